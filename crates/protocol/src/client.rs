//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::ChatStatus;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Subscriptions
    /// Join a chat room (idempotent). Replies with a `ChatSnapshot`.
    JoinChat {
        chat_id: String,
    },
    LeaveChat {
        chat_id: String,
    },
    /// Subscribe to queue-wide events (admin only).
    SubscribeList,

    // Queries
    /// Fetch (and lazily create) the calling customer's chat.
    GetOrCreateChat,
    /// List chats, optionally filtered by status (admin only).
    ListChats {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ChatStatus>,
    },
    GetChat {
        chat_id: String,
    },

    // Actions
    SendMessage {
        chat_id: String,
        body: String,
    },
    MarkRead {
        chat_id: String,
    },
    ClaimChat {
        chat_id: String,
    },
    TakeoverChat {
        chat_id: String,
    },
    ReleaseChat {
        chat_id: String,
    },
    ResolveChat {
        chat_id: String,
    },
    DeleteChat {
        chat_id: String,
    },

    // Ephemeral signals
    /// Fire-and-forget typing indicator; never persisted, never retried.
    Typing {
        chat_id: String,
        started: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_send_message() {
        let msg = ClientMessage::SendMessage {
            chat_id: "chat-1".to_string(),
            body: "hello".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"send_message\""));
        let back: ClientMessage = serde_json::from_str(&json).expect("deserialize");
        match back {
            ClientMessage::SendMessage { chat_id, body } => {
                assert_eq!(chat_id, "chat-1");
                assert_eq!(body, "hello");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn list_chats_omits_missing_filter() {
        let msg = ClientMessage::ListChats { status: None };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(json, "{\"type\":\"list_chats\"}");

        let back: ClientMessage =
            serde_json::from_str("{\"type\":\"list_chats\",\"status\":\"unassigned\"}")
                .expect("deserialize");
        match back {
            ClientMessage::ListChats { status } => {
                assert_eq!(status, Some(ChatStatus::Unassigned));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
