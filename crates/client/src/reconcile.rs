//! Optimistic action tracking.
//!
//! Mutating requests are fire-and-forget on the wire; the UI holds a
//! `PendingAction` until an authoritative broadcast confirms the change
//! or an error for the same chat rolls it back. Transcript contents are
//! never optimistically mutated, so a rollback only has to clear the
//! pending marker (and restore composer text for a failed send).

use deskline_protocol::{Role, ServerMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Claim { chat_id: String },
    Takeover { chat_id: String },
    Release { chat_id: String },
    Resolve { chat_id: String },
    Send { chat_id: String, body: String },
    MarkRead { chat_id: String },
    Delete { chat_id: String },
}

impl ActionKind {
    fn chat_id(&self) -> &str {
        match self {
            ActionKind::Claim { chat_id }
            | ActionKind::Takeover { chat_id }
            | ActionKind::Release { chat_id }
            | ActionKind::Resolve { chat_id }
            | ActionKind::Send { chat_id, .. }
            | ActionKind::MarkRead { chat_id }
            | ActionKind::Delete { chat_id } => chat_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStatus {
    Pending,
    Confirmed,
    RolledBack { code: String },
}

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub id: u64,
    pub kind: ActionKind,
    pub status: PendingStatus,
}

/// Tracks this participant's in-flight actions against the event stream.
pub struct Reconciler {
    actor_id: String,
    actor_role: Role,
    next_id: u64,
    pending: Vec<PendingAction>,
}

impl Reconciler {
    pub fn new(actor_id: impl Into<String>, actor_role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_role,
            next_id: 1,
            pending: Vec::new(),
        }
    }

    /// Record an action that was just sent. Returns a handle for status
    /// queries.
    pub fn track(&mut self, kind: ActionKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push(PendingAction {
            id,
            kind,
            status: PendingStatus::Pending,
        });
        id
    }

    pub fn status(&self, id: u64) -> Option<&PendingStatus> {
        self.pending.iter().find(|a| a.id == id).map(|a| &a.status)
    }

    pub fn has_pending(&self, chat_id: &str) -> bool {
        self.pending
            .iter()
            .any(|a| a.status == PendingStatus::Pending && a.kind.chat_id() == chat_id)
    }

    /// Remove and return actions that have reached a terminal status.
    pub fn take_resolved(&mut self) -> Vec<PendingAction> {
        let (resolved, pending) = self
            .pending
            .drain(..)
            .partition(|a| a.status != PendingStatus::Pending);
        self.pending = pending;
        resolved
    }

    /// Match one authoritative event against in-flight actions.
    pub fn observe(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::AssignmentChanged {
                chat_id, admin_id, ..
            } => {
                if admin_id == &self.actor_id {
                    self.confirm(chat_id, |kind| {
                        matches!(
                            kind,
                            ActionKind::Claim { .. } | ActionKind::Takeover { .. }
                        )
                    });
                }
            }

            ServerMessage::TakeoverOccurred {
                chat_id, admin_id, ..
            } => {
                if admin_id == &self.actor_id {
                    self.confirm(chat_id, |kind| matches!(kind, ActionKind::Takeover { .. }));
                }
            }

            ServerMessage::ReleaseOccurred { chat_id } => {
                self.confirm(chat_id, |kind| matches!(kind, ActionKind::Release { .. }));
            }

            ServerMessage::ChatResolved { chat_id } => {
                self.confirm(chat_id, |kind| matches!(kind, ActionKind::Resolve { .. }));
            }

            ServerMessage::MessageAppended {
                chat_id, message, ..
            } => {
                if message.sender_id == self.actor_id {
                    self.confirm(chat_id, |kind| matches!(kind, ActionKind::Send { .. }));
                }
            }

            ServerMessage::ReadReceipts {
                chat_id,
                reader_role,
                ..
            } => {
                // Receipts for the other role come from the server's
                // auto-mark-read, not from this actor's request
                if *reader_role == self.actor_role {
                    self.confirm(chat_id, |kind| matches!(kind, ActionKind::MarkRead { .. }));
                }
            }

            ServerMessage::ChatDeleted { chat_id } => {
                self.confirm(chat_id, |kind| matches!(kind, ActionKind::Delete { .. }));
            }

            ServerMessage::Error {
                code,
                chat_id: Some(chat_id),
                ..
            } => {
                // Roll back the oldest pending action on that chat
                if let Some(action) = self
                    .pending
                    .iter_mut()
                    .find(|a| a.status == PendingStatus::Pending && a.kind.chat_id() == chat_id)
                {
                    action.status = PendingStatus::RolledBack { code: code.clone() };
                }
            }

            _ => {}
        }
    }

    fn confirm(&mut self, chat_id: &str, matcher: impl Fn(&ActionKind) -> bool) {
        if let Some(action) = self.pending.iter_mut().find(|a| {
            a.status == PendingStatus::Pending && a.kind.chat_id() == chat_id && matcher(&a.kind)
        }) {
            action.status = PendingStatus::Confirmed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_protocol::{ChatMessage, ChatStatus, UnreadCount};

    fn claim(chat_id: &str) -> ActionKind {
        ActionKind::Claim {
            chat_id: chat_id.to_string(),
        }
    }

    #[test]
    fn claim_confirmed_by_own_assignment() {
        let mut rec = Reconciler::new("admin-a", Role::Admin);
        let id = rec.track(claim("chat-1"));

        rec.observe(&ServerMessage::AssignmentChanged {
            chat_id: "chat-1".to_string(),
            admin_id: "admin-a".to_string(),
            status: ChatStatus::Assigned,
        });

        assert_eq!(rec.status(id), Some(&PendingStatus::Confirmed));
    }

    #[test]
    fn claim_rolled_back_by_contention_error() {
        let mut rec = Reconciler::new("admin-b", Role::Admin);
        let id = rec.track(claim("chat-1"));

        rec.observe(&ServerMessage::Error {
            code: "already_assigned".to_string(),
            message: "chat is already assigned to another admin".to_string(),
            chat_id: Some("chat-1".to_string()),
        });

        assert_eq!(
            rec.status(id),
            Some(&PendingStatus::RolledBack {
                code: "already_assigned".to_string()
            })
        );
    }

    #[test]
    fn losing_admin_is_not_confirmed_by_winners_assignment() {
        let mut rec = Reconciler::new("admin-b", Role::Admin);
        let id = rec.track(claim("chat-1"));

        rec.observe(&ServerMessage::AssignmentChanged {
            chat_id: "chat-1".to_string(),
            admin_id: "admin-a".to_string(),
            status: ChatStatus::Assigned,
        });

        assert_eq!(rec.status(id), Some(&PendingStatus::Pending));
    }

    #[test]
    fn send_confirmed_by_own_appended_message() {
        let mut rec = Reconciler::new("cust-1", Role::Customer);
        let id = rec.track(ActionKind::Send {
            chat_id: "chat-1".to_string(),
            body: "hello".to_string(),
        });

        rec.observe(&ServerMessage::MessageAppended {
            chat_id: "chat-1".to_string(),
            message: ChatMessage {
                id: "msg-1".to_string(),
                chat_id: "chat-1".to_string(),
                sender_id: "cust-1".to_string(),
                sender_role: Role::Customer,
                body: "hello".to_string(),
                created_at: "2026-08-20T10:01:00Z".to_string(),
                is_read: false,
            },
            unread: UnreadCount::default(),
        });

        assert_eq!(rec.status(id), Some(&PendingStatus::Confirmed));
    }

    #[test]
    fn mark_read_confirmed_only_by_own_role_receipt() {
        let mut rec = Reconciler::new("admin-a", Role::Admin);
        let id = rec.track(ActionKind::MarkRead {
            chat_id: "chat-1".to_string(),
        });

        // The customer's auto-mark-read receipt is not ours
        rec.observe(&ServerMessage::ReadReceipts {
            chat_id: "chat-1".to_string(),
            reader_role: Role::Customer,
            unread: UnreadCount::default(),
        });
        assert_eq!(rec.status(id), Some(&PendingStatus::Pending));

        rec.observe(&ServerMessage::ReadReceipts {
            chat_id: "chat-1".to_string(),
            reader_role: Role::Admin,
            unread: UnreadCount::default(),
        });
        assert_eq!(rec.status(id), Some(&PendingStatus::Confirmed));
    }

    #[test]
    fn take_resolved_drains_terminal_actions_only() {
        let mut rec = Reconciler::new("admin-a", Role::Admin);
        let confirmed = rec.track(claim("chat-1"));
        let still_pending = rec.track(claim("chat-2"));

        rec.observe(&ServerMessage::AssignmentChanged {
            chat_id: "chat-1".to_string(),
            admin_id: "admin-a".to_string(),
            status: ChatStatus::Assigned,
        });

        let resolved = rec.take_resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, confirmed);
        assert_eq!(rec.status(still_pending), Some(&PendingStatus::Pending));
        assert!(rec.has_pending("chat-2"));
    }
}
