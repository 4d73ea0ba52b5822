//! Client-side reconciliation for Deskline chat UIs.
//!
//! Server broadcasts are the single source of truth. This crate keeps a
//! local [`Projection`] of chat state that only ever changes in response
//! to authoritative events, tracks in-flight optimistic actions through
//! [`Reconciler`], and drives the reconnect policy when the WebSocket
//! drops.

pub mod backoff;
pub mod connection;
pub mod projection;
pub mod reconcile;
pub mod transport;

pub use backoff::Backoff;
pub use connection::{ConnectionState, ConnectionTracker};
pub use projection::{Projection, SyncAction};
pub use reconcile::{ActionKind, PendingAction, PendingStatus, Reconciler};
pub use transport::{ClientError, ClientEvent, Transport};
