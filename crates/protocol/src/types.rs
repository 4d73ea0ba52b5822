//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Participant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    /// The role on the other side of the conversation
    pub fn opposite(self) -> Role {
        match self {
            Role::Customer => Role::Admin,
            Role::Admin => Role::Customer,
        }
    }
}

/// Chat assignment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Unassigned,
    Assigned,
    Resolved,
}

/// A message in a support conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub body: String,
    pub created_at: String,
    pub is_read: bool,
}

/// Per-role unread counters for a chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub customer: u32,
    pub admin: u32,
}

impl UnreadCount {
    pub fn for_role(&self, role: Role) -> u32 {
        match role {
            Role::Customer => self.customer,
            Role::Admin => self.admin,
        }
    }
}

/// One entry in a chat's assignment audit trail.
/// `unassigned_at` is `None` while the entry is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEntry {
    pub admin_id: String,
    pub assigned_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unassigned_at: Option<String>,
}

/// Summary of a chat for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub customer_id: String,
    pub status: ChatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_admin_id: Option<String>,
    pub unread: UnreadCount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    pub created_at: String,
}

/// Full chat state: summary fields plus the transcript and audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub id: String,
    pub customer_id: String,
    pub status: ChatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_admin_id: Option<String>,
    pub unread: UnreadCount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    pub created_at: String,
    pub messages: Vec<ChatMessage>,
    pub assignment_history: Vec<AssignmentEntry>,
}

impl ChatState {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            customer_id: self.customer_id.clone(),
            status: self.status,
            assigned_admin_id: self.assigned_admin_id.clone(),
            unread: self.unread,
            last_message_at: self.last_message_at.clone(),
            created_at: self.created_at.clone(),
        }
    }
}
