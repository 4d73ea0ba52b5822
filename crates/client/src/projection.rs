//! Local mirror of server-side chat state.
//!
//! The projection never invents state: it only merges authoritative
//! events. When an event arrives for a chat the projection has never
//! seen, it asks the caller to refetch instead of building a partial
//! record from an increment.

use std::collections::{HashMap, HashSet};

use deskline_protocol::{ChatState, ChatSummary, Role, ServerMessage};

/// Follow-up work an applied event requires from the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// The chat list is stale; re-request it.
    RefetchList,
    /// A joined chat's transcript is stale; re-request the snapshot.
    RefetchChat(String),
}

#[derive(Default)]
pub struct Projection {
    summaries: HashMap<String, ChatSummary>,
    transcripts: HashMap<String, ChatState>,
    seen_message_ids: HashSet<String>,
    typing: HashMap<String, HashSet<String>>,
    online: HashMap<String, bool>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self, chat_id: &str) -> Option<&ChatSummary> {
        self.summaries.get(chat_id)
    }

    pub fn transcript(&self, chat_id: &str) -> Option<&ChatState> {
        self.transcripts.get(chat_id)
    }

    /// Summaries ordered most recently active first, matching the server's
    /// queue ordering.
    pub fn summaries(&self) -> Vec<&ChatSummary> {
        let mut all: Vec<&ChatSummary> = self.summaries.values().collect();
        all.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        all
    }

    /// Aggregate unread badge for the admin queue view.
    pub fn admin_unread_total(&self) -> u32 {
        self.summaries.values().map(|c| c.unread.admin).sum()
    }

    pub fn typing_participants(&self, chat_id: &str) -> Vec<&str> {
        self.typing
            .get(chat_id)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, participant_id: &str) -> bool {
        self.online.get(participant_id).copied().unwrap_or(false)
    }

    /// Merge one authoritative event and report any refetches it requires.
    pub fn apply(&mut self, msg: ServerMessage) -> Vec<SyncAction> {
        match msg {
            ServerMessage::ChatsList { chats } => {
                self.summaries = chats.into_iter().map(|c| (c.id.clone(), c)).collect();
                Vec::new()
            }

            ServerMessage::ChatSnapshot { chat } => {
                for message in &chat.messages {
                    self.seen_message_ids.insert(message.id.clone());
                }
                self.summaries.insert(chat.id.clone(), chat.summary());
                self.transcripts.insert(chat.id.clone(), chat);
                Vec::new()
            }

            ServerMessage::MessageAppended {
                chat_id,
                message,
                unread,
            } => {
                if !self.seen_message_ids.insert(message.id.clone()) {
                    return Vec::new();
                }
                let Some(summary) = self.summaries.get_mut(&chat_id) else {
                    return vec![SyncAction::RefetchList];
                };
                summary.unread = unread;
                summary.last_message_at = Some(message.created_at.clone());
                // A message ends any typing indicator from its sender
                if let Some(typing) = self.typing.get_mut(&chat_id) {
                    typing.remove(&message.sender_id);
                }
                if let Some(transcript) = self.transcripts.get_mut(&chat_id) {
                    transcript.unread = unread;
                    transcript.last_message_at = Some(message.created_at.clone());
                    transcript.messages.push(message);
                }
                Vec::new()
            }

            ServerMessage::ReadReceipts {
                chat_id,
                reader_role,
                unread,
            } => {
                let Some(summary) = self.summaries.get_mut(&chat_id) else {
                    return vec![SyncAction::RefetchList];
                };
                summary.unread = unread;
                if let Some(transcript) = self.transcripts.get_mut(&chat_id) {
                    transcript.unread = unread;
                    for message in &mut transcript.messages {
                        if message.sender_role == reader_role.opposite() {
                            message.is_read = true;
                        }
                    }
                }
                Vec::new()
            }

            ServerMessage::AssignmentChanged {
                chat_id,
                admin_id,
                status,
            } => self.merge_assignment(&chat_id, Some(admin_id), status),

            ServerMessage::TakeoverOccurred {
                chat_id, admin_id, ..
            } => self.merge_assignment(
                &chat_id,
                Some(admin_id),
                deskline_protocol::ChatStatus::Assigned,
            ),

            ServerMessage::ReleaseOccurred { chat_id } => {
                self.merge_assignment(&chat_id, None, deskline_protocol::ChatStatus::Unassigned)
            }

            ServerMessage::ChatResolved { chat_id } => {
                let Some(summary) = self.summaries.get_mut(&chat_id) else {
                    return vec![SyncAction::RefetchList];
                };
                summary.status = deskline_protocol::ChatStatus::Resolved;
                if let Some(transcript) = self.transcripts.get_mut(&chat_id) {
                    transcript.status = deskline_protocol::ChatStatus::Resolved;
                }
                Vec::new()
            }

            ServerMessage::ChatCreated { chat } | ServerMessage::ChatListChanged { chat } => {
                if let Some(transcript) = self.transcripts.get_mut(&chat.id) {
                    transcript.status = chat.status;
                    transcript.assigned_admin_id = chat.assigned_admin_id.clone();
                    transcript.unread = chat.unread;
                    transcript.last_message_at = chat.last_message_at.clone();
                }
                self.summaries.insert(chat.id.clone(), chat);
                Vec::new()
            }

            ServerMessage::ChatDeleted { chat_id } => {
                self.summaries.remove(&chat_id);
                if let Some(transcript) = self.transcripts.remove(&chat_id) {
                    for message in &transcript.messages {
                        self.seen_message_ids.remove(&message.id);
                    }
                }
                self.typing.remove(&chat_id);
                Vec::new()
            }

            ServerMessage::PresenceChanged {
                participant_id,
                online,
                ..
            } => {
                self.online.insert(participant_id, online);
                Vec::new()
            }

            ServerMessage::TypingChanged {
                chat_id,
                participant_id,
                started,
                ..
            } => {
                let entry = self.typing.entry(chat_id).or_default();
                if started {
                    entry.insert(participant_id);
                } else {
                    entry.remove(&participant_id);
                }
                Vec::new()
            }

            // Errors never mutate the mirror; the reconciler consumes them
            ServerMessage::Error { .. } => Vec::new(),
        }
    }

    fn merge_assignment(
        &mut self,
        chat_id: &str,
        admin_id: Option<String>,
        status: deskline_protocol::ChatStatus,
    ) -> Vec<SyncAction> {
        let Some(summary) = self.summaries.get_mut(chat_id) else {
            return vec![SyncAction::RefetchList];
        };
        summary.assigned_admin_id = admin_id.clone();
        summary.status = status;
        if let Some(transcript) = self.transcripts.get_mut(chat_id) {
            transcript.assigned_admin_id = admin_id;
            transcript.status = status;
            // Assignment history rows are server-authored; the transcript's
            // copy is refreshed on the next snapshot rather than guessed here
            return vec![SyncAction::RefetchChat(chat_id.to_string())];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_protocol::{ChatMessage, ChatStatus, UnreadCount};

    fn summary(id: &str) -> ChatSummary {
        ChatSummary {
            id: id.to_string(),
            customer_id: format!("cust-{id}"),
            status: ChatStatus::Unassigned,
            assigned_admin_id: None,
            unread: UnreadCount::default(),
            last_message_at: None,
            created_at: "2026-08-20T10:00:00Z".to_string(),
        }
    }

    fn snapshot(id: &str) -> ChatState {
        ChatState {
            id: id.to_string(),
            customer_id: format!("cust-{id}"),
            status: ChatStatus::Unassigned,
            assigned_admin_id: None,
            unread: UnreadCount::default(),
            last_message_at: None,
            created_at: "2026-08-20T10:00:00Z".to_string(),
            messages: Vec::new(),
            assignment_history: Vec::new(),
        }
    }

    fn message(id: &str, chat_id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: "cust-chat-1".to_string(),
            sender_role: Role::Customer,
            body: "hello".to_string(),
            created_at: "2026-08-20T10:01:00Z".to_string(),
            is_read: false,
        }
    }

    #[test]
    fn duplicate_message_events_apply_once() {
        let mut proj = Projection::new();
        proj.apply(ServerMessage::ChatSnapshot {
            chat: snapshot("chat-1"),
        });

        let appended = ServerMessage::MessageAppended {
            chat_id: "chat-1".to_string(),
            message: message("msg-1", "chat-1"),
            unread: UnreadCount {
                customer: 0,
                admin: 1,
            },
        };
        proj.apply(appended.clone());
        proj.apply(appended);

        assert_eq!(proj.transcript("chat-1").unwrap().messages.len(), 1);
        assert_eq!(proj.admin_unread_total(), 1);
    }

    #[test]
    fn unknown_chat_event_requests_list_refetch() {
        let mut proj = Projection::new();
        let actions = proj.apply(ServerMessage::MessageAppended {
            chat_id: "chat-missing".to_string(),
            message: message("msg-1", "chat-missing"),
            unread: UnreadCount::default(),
        });
        assert_eq!(actions, vec![SyncAction::RefetchList]);
        assert!(proj.summary("chat-missing").is_none());
    }

    #[test]
    fn delete_clears_summary_and_transcript() {
        let mut proj = Projection::new();
        proj.apply(ServerMessage::ChatSnapshot {
            chat: snapshot("chat-1"),
        });
        proj.apply(ServerMessage::MessageAppended {
            chat_id: "chat-1".to_string(),
            message: message("msg-1", "chat-1"),
            unread: UnreadCount::default(),
        });

        proj.apply(ServerMessage::ChatDeleted {
            chat_id: "chat-1".to_string(),
        });
        assert!(proj.summary("chat-1").is_none());
        assert!(proj.transcript("chat-1").is_none());
    }

    #[test]
    fn read_receipts_flip_counterpart_messages() {
        let mut proj = Projection::new();
        let mut chat = snapshot("chat-1");
        chat.messages.push(message("msg-1", "chat-1"));
        chat.unread.admin = 1;
        proj.apply(ServerMessage::ChatSnapshot { chat });

        proj.apply(ServerMessage::ReadReceipts {
            chat_id: "chat-1".to_string(),
            reader_role: Role::Admin,
            unread: UnreadCount::default(),
        });

        let transcript = proj.transcript("chat-1").unwrap();
        assert!(transcript.messages[0].is_read);
        assert_eq!(transcript.unread.admin, 0);
    }

    #[test]
    fn assignment_on_open_transcript_requests_snapshot_refetch() {
        let mut proj = Projection::new();
        proj.apply(ServerMessage::ChatSnapshot {
            chat: snapshot("chat-1"),
        });

        let actions = proj.apply(ServerMessage::AssignmentChanged {
            chat_id: "chat-1".to_string(),
            admin_id: "admin-a".to_string(),
            status: ChatStatus::Assigned,
        });

        assert_eq!(actions, vec![SyncAction::RefetchChat("chat-1".to_string())]);
        let summary = proj.summary("chat-1").unwrap();
        assert_eq!(summary.assigned_admin_id.as_deref(), Some("admin-a"));
        assert_eq!(summary.status, ChatStatus::Assigned);
    }

    #[test]
    fn list_changed_upserts_unknown_chats() {
        let mut proj = Projection::new();
        let actions = proj.apply(ServerMessage::ChatListChanged {
            chat: summary("chat-9"),
        });
        assert!(actions.is_empty());
        assert!(proj.summary("chat-9").is_some());
    }

    #[test]
    fn typing_tracks_start_and_stop() {
        let mut proj = Projection::new();
        proj.apply(ServerMessage::TypingChanged {
            chat_id: "chat-1".to_string(),
            participant_id: "cust-1".to_string(),
            role: Role::Customer,
            started: true,
        });
        assert_eq!(proj.typing_participants("chat-1"), vec!["cust-1"]);

        proj.apply(ServerMessage::TypingChanged {
            chat_id: "chat-1".to_string(),
            participant_id: "cust-1".to_string(),
            role: Role::Customer,
            started: false,
        });
        assert!(proj.typing_participants("chat-1").is_empty());
    }
}
