//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Full state sync
    ChatsList {
        chats: Vec<ChatSummary>,
    },
    ChatSnapshot {
        chat: ChatState,
    },

    // Incremental updates
    MessageAppended {
        chat_id: String,
        message: ChatMessage,
        unread: UnreadCount,
    },
    /// Read receipts: `reader_role` marked all messages from the other
    /// role as read. Counters for that role are now zero.
    ReadReceipts {
        chat_id: String,
        reader_role: Role,
        unread: UnreadCount,
    },

    // Assignment lifecycle
    AssignmentChanged {
        chat_id: String,
        admin_id: String,
        status: ChatStatus,
    },
    /// Forced reassignment — distinct from a plain `AssignmentChanged`
    /// so the previous holder's UI can show who took the chat.
    TakeoverOccurred {
        chat_id: String,
        previous_admin_id: String,
        admin_id: String,
    },
    ReleaseOccurred {
        chat_id: String,
    },
    ChatResolved {
        chat_id: String,
    },

    // Chat lifecycle
    ChatCreated {
        chat: ChatSummary,
    },
    /// Queue-wide list refresh trigger: a chat's ordering, unread counts
    /// or status changed. Carries the fresh summary so admin list views
    /// can update without a follow-up fetch.
    ChatListChanged {
        chat: ChatSummary,
    },
    ChatDeleted {
        chat_id: String,
    },

    // Ephemeral signals
    PresenceChanged {
        participant_id: String,
        role: Role,
        online: bool,
    },
    TypingChanged {
        chat_id: String,
        participant_id: String,
        role: Role,
        started: bool,
    },

    // Errors
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::ServerMessage;
    use crate::types::*;

    fn test_summary() -> ChatSummary {
        ChatSummary {
            id: "chat-1".to_string(),
            customer_id: "cust-1".to_string(),
            status: ChatStatus::Unassigned,
            assigned_admin_id: None,
            unread: UnreadCount::default(),
            last_message_at: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn roundtrip_message_appended() {
        let msg = ServerMessage::MessageAppended {
            chat_id: "chat-1".to_string(),
            message: ChatMessage {
                id: "msg-1".to_string(),
                chat_id: "chat-1".to_string(),
                sender_id: "cust-1".to_string(),
                sender_role: Role::Customer,
                body: "my order never arrived".to_string(),
                created_at: "2026-01-01T00:00:01Z".to_string(),
                is_read: false,
            },
            unread: UnreadCount {
                customer: 0,
                admin: 1,
            },
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::MessageAppended {
                chat_id,
                message,
                unread,
            } => {
                assert_eq!(chat_id, "chat-1");
                assert_eq!(message.sender_role, Role::Customer);
                assert_eq!(unread.admin, 1);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn roundtrip_takeover_is_distinct_from_assignment() {
        let takeover = ServerMessage::TakeoverOccurred {
            chat_id: "chat-1".to_string(),
            previous_admin_id: "admin-a".to_string(),
            admin_id: "admin-b".to_string(),
        };
        let json = serde_json::to_string(&takeover).expect("serialize");
        assert!(json.contains("\"type\":\"takeover_occurred\""));

        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::TakeoverOccurred {
                previous_admin_id,
                admin_id,
                ..
            } => {
                assert_eq!(previous_admin_id, "admin-a");
                assert_eq!(admin_id, "admin-b");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn roundtrip_chat_created() {
        let msg = ServerMessage::ChatCreated {
            chat: test_summary(),
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::ChatCreated { chat } => {
                assert_eq!(chat.id, "chat-1");
                assert_eq!(chat.status, ChatStatus::Unassigned);
                assert!(chat.assigned_admin_id.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn error_omits_missing_chat_id() {
        let msg = ServerMessage::Error {
            code: "not_found".to_string(),
            message: "unknown chat".to_string(),
            chat_id: None,
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(!json.contains("chat_id"));
    }
}
