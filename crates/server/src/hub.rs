//! Real-time hub — groups live connections into per-chat rooms and
//! fans broadcasts out to them, plus a queue-wide channel for all
//! connected admins.
//!
//! Delivery is best-effort: closed senders are pruned on every broadcast
//! and there is no replay buffer — a reconnecting client refetches.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use deskline_protocol::{Role, ServerMessage};

/// One live connection's membership in a room or the admin channel.
#[derive(Clone)]
pub struct Member {
    pub conn_id: u64,
    pub participant_id: String,
    pub role: Role,
    pub tx: mpsc::Sender<ServerMessage>,
}

#[derive(Default)]
pub struct Hub {
    rooms: DashMap<String, Vec<Member>>,
    admins: DashMap<u64, Member>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a chat room. Idempotent: joining a room you are
    /// already in neither duplicates delivery nor re-triggers side effects.
    /// Returns `true` when the membership is new.
    pub fn join(&self, chat_id: &str, member: Member) -> bool {
        let mut room = self.rooms.entry(chat_id.to_string()).or_default();
        if room.iter().any(|m| m.conn_id == member.conn_id) {
            return false;
        }
        debug!(
            component = "hub",
            event = "room.joined",
            chat_id = %chat_id,
            participant_id = %member.participant_id,
            role = ?member.role,
            "Connection joined room"
        );
        room.push(member);
        true
    }

    pub fn leave(&self, chat_id: &str, conn_id: u64) {
        if let Some(mut room) = self.rooms.get_mut(chat_id) {
            room.retain(|m| m.conn_id != conn_id);
        }
    }

    /// Drop a connection from every room and the admin channel.
    /// Called on disconnect.
    pub fn leave_all(&self, conn_id: u64) {
        for mut room in self.rooms.iter_mut() {
            room.retain(|m| m.conn_id != conn_id);
        }
        self.admins.remove(&conn_id);
    }

    /// Subscribe an admin connection to queue-wide events.
    pub fn subscribe_admins(&self, member: Member) {
        self.admins.insert(member.conn_id, member);
    }

    /// Whether `participant_id` currently has the chat's room open on any
    /// live connection. Drives the auto-mark-read policy.
    pub fn is_viewing(&self, chat_id: &str, participant_id: &str) -> bool {
        self.rooms
            .get(chat_id)
            .map(|room| {
                room.iter()
                    .any(|m| m.participant_id == participant_id && !m.tx.is_closed())
            })
            .unwrap_or(false)
    }

    /// Broadcast to every connection in a chat room.
    pub async fn broadcast_room(&self, chat_id: &str, msg: &ServerMessage) {
        self.broadcast_room_except(chat_id, None, msg).await;
    }

    /// Broadcast to a room, optionally skipping one connection (used for
    /// typing relays, which the sender does not need echoed back).
    pub async fn broadcast_room_except(
        &self,
        chat_id: &str,
        skip_conn_id: Option<u64>,
        msg: &ServerMessage,
    ) {
        let targets: Vec<mpsc::Sender<ServerMessage>> = {
            let mut room = match self.rooms.get_mut(chat_id) {
                Some(room) => room,
                None => return,
            };
            room.retain(|m| !m.tx.is_closed());
            room.iter()
                .filter(|m| Some(m.conn_id) != skip_conn_id)
                .map(|m| m.tx.clone())
                .collect()
        };

        for tx in targets {
            let _ = tx.send(msg.clone()).await;
        }
    }

    /// Broadcast to every connected admin subscribed to queue-wide events.
    pub async fn broadcast_admins(&self, msg: &ServerMessage) {
        self.admins.retain(|_, m| !m.tx.is_closed());
        let targets: Vec<mpsc::Sender<ServerMessage>> =
            self.admins.iter().map(|entry| entry.tx.clone()).collect();

        for tx in targets {
            let _ = tx.send(msg.clone()).await;
        }
    }

    /// Announce a participant going online or offline to all admins.
    pub async fn broadcast_presence(&self, participant_id: &str, role: Role, online: bool) {
        self.broadcast_admins(&ServerMessage::PresenceChanged {
            participant_id: participant_id.to_string(),
            role,
            online,
        })
        .await;
    }
}
