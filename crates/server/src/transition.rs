//! Pure decision layer for chat actions.
//!
//! Authorization checks and broadcast fan-out live here as synchronous
//! functions over plain data: no IO, no async, no locking — fully
//! unit-testable. The store's conditional WHERE guards remain the final
//! arbiter when concurrent writers race; this layer produces the clean
//! upfront errors and decides which rooms hear about each outcome.

use deskline_protocol::{ChatStatus, ChatSummary, Role, ServerMessage};

use crate::auth::Identity;
use crate::error::ChatError;
use crate::store::{SendOutcome, TakeoverOutcome};

/// A chat action submitted over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Send,
    MarkRead,
    Typing,
    Claim,
    Takeover,
    Release,
    Resolve,
    Delete,
}

impl Action {
    fn admin_only(self) -> bool {
        matches!(
            self,
            Action::Claim | Action::Takeover | Action::Release | Action::Resolve | Action::Delete
        )
    }
}

/// Check whether `identity` may perform `action` on `chat`.
///
/// Customers only ever see their own chat; someone else's chat id is
/// reported as `NotFound` rather than leaking its existence.
pub fn authorize(identity: &Identity, action: Action, chat: &ChatSummary) -> Result<(), ChatError> {
    match identity.role {
        Role::Customer => {
            if chat.customer_id != identity.id {
                return Err(ChatError::NotFound);
            }
            if action.admin_only() {
                return Err(ChatError::NotAdmin);
            }
            Ok(())
        }
        Role::Admin => match action {
            Action::Claim => match chat.status {
                ChatStatus::Unassigned => Ok(()),
                _ => Err(ChatError::AlreadyAssigned),
            },
            Action::Release | Action::Resolve => {
                if chat.status == ChatStatus::Assigned
                    && chat.assigned_admin_id.as_deref() == Some(identity.id.as_str())
                {
                    Ok(())
                } else {
                    Err(ChatError::NotHolder)
                }
            }
            Action::Send => match chat.status {
                ChatStatus::Assigned
                    if chat.assigned_admin_id.as_deref() != Some(identity.id.as_str()) =>
                {
                    Err(ChatError::NotHolder)
                }
                _ => Ok(()),
            },
            Action::View
            | Action::MarkRead
            | Action::Typing
            | Action::Takeover
            | Action::Delete => Ok(()),
        },
    }
}

/// Where a broadcast goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every live connection joined to the chat's room.
    Room(String),
    /// Every connected admin subscribed to queue-wide events.
    Admins,
}

/// One planned broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerMessage,
}

fn room(chat_id: &str, message: ServerMessage) -> Outbound {
    Outbound {
        target: Target::Room(chat_id.to_string()),
        message,
    }
}

fn admins(message: ServerMessage) -> Outbound {
    Outbound {
        target: Target::Admins,
        message,
    }
}

/// Broadcasts for a freshly created chat.
pub fn created_effects(chat: &ChatSummary) -> Vec<Outbound> {
    vec![admins(ServerMessage::ChatCreated { chat: chat.clone() })]
}

/// Broadcasts for a successful claim.
pub fn claim_effects(chat: &ChatSummary, admin_id: &str) -> Vec<Outbound> {
    let msg = ServerMessage::AssignmentChanged {
        chat_id: chat.id.clone(),
        admin_id: admin_id.to_string(),
        status: chat.status,
    };
    vec![
        room(&chat.id, msg.clone()),
        admins(msg),
        admins(ServerMessage::ChatListChanged { chat: chat.clone() }),
    ]
}

/// Broadcasts for a takeover. A degenerate takeover (the chat had no
/// holder) is announced as a plain assignment change instead.
pub fn takeover_effects(outcome: &TakeoverOutcome, admin_id: &str) -> Vec<Outbound> {
    let chat = &outcome.chat;
    let mut effects = match &outcome.previous_admin_id {
        Some(previous) => {
            let msg = ServerMessage::TakeoverOccurred {
                chat_id: chat.id.clone(),
                previous_admin_id: previous.clone(),
                admin_id: admin_id.to_string(),
            };
            vec![room(&chat.id, msg.clone()), admins(msg)]
        }
        None => {
            let msg = ServerMessage::AssignmentChanged {
                chat_id: chat.id.clone(),
                admin_id: admin_id.to_string(),
                status: chat.status,
            };
            vec![room(&chat.id, msg.clone()), admins(msg)]
        }
    };
    effects.push(admins(ServerMessage::ChatListChanged { chat: chat.clone() }));
    effects
}

/// Broadcasts for a release back to the shared pool.
pub fn release_effects(chat: &ChatSummary) -> Vec<Outbound> {
    let msg = ServerMessage::ReleaseOccurred {
        chat_id: chat.id.clone(),
    };
    vec![
        room(&chat.id, msg.clone()),
        admins(msg),
        admins(ServerMessage::ChatListChanged { chat: chat.clone() }),
    ]
}

/// Broadcasts for a resolve.
pub fn resolve_effects(chat: &ChatSummary) -> Vec<Outbound> {
    let msg = ServerMessage::ChatResolved {
        chat_id: chat.id.clone(),
    };
    vec![
        room(&chat.id, msg.clone()),
        admins(msg),
        admins(ServerMessage::ChatListChanged { chat: chat.clone() }),
    ]
}

/// Broadcasts for an appended message, including any assignment side
/// effects the send carried (auto-claim, resolved-chat reopen).
pub fn send_effects(outcome: &SendOutcome, sender_id: &str) -> Vec<Outbound> {
    let chat = &outcome.chat;
    let mut effects = Vec::new();

    if outcome.auto_claimed {
        let msg = ServerMessage::AssignmentChanged {
            chat_id: chat.id.clone(),
            admin_id: sender_id.to_string(),
            status: chat.status,
        };
        effects.push(room(&chat.id, msg.clone()));
        effects.push(admins(msg));
    }
    if outcome.reopened {
        let msg = ServerMessage::ReleaseOccurred {
            chat_id: chat.id.clone(),
        };
        effects.push(room(&chat.id, msg.clone()));
        effects.push(admins(msg));
    }

    let appended = ServerMessage::MessageAppended {
        chat_id: chat.id.clone(),
        message: outcome.message.clone(),
        unread: chat.unread,
    };
    effects.push(room(&chat.id, appended));
    effects.push(admins(ServerMessage::ChatListChanged { chat: chat.clone() }));
    effects
}

/// Broadcasts for a mark-read.
pub fn read_effects(chat_id: &str, reader_role: Role, unread: deskline_protocol::UnreadCount) -> Vec<Outbound> {
    vec![room(
        chat_id,
        ServerMessage::ReadReceipts {
            chat_id: chat_id.to_string(),
            reader_role,
            unread,
        },
    )]
}

/// Broadcasts for a destructive delete: every viewer must drop the entity.
pub fn delete_effects(chat_id: &str) -> Vec<Outbound> {
    let msg = ServerMessage::ChatDeleted {
        chat_id: chat_id.to_string(),
    };
    vec![room(chat_id, msg.clone()), admins(msg)]
}
