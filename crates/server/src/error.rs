//! Domain error taxonomy
//!
//! Contention and authorization failures are expected outcomes under
//! concurrent admin activity and are surfaced to the caller verbatim,
//! never retried server-side.

use deskline_protocol::ServerMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Claim race lost: another admin already holds the chat.
    #[error("chat is already assigned to another admin")]
    AlreadyAssigned,

    /// The acting admin is not the current holder of an assigned chat.
    #[error("you are not the assigned admin for this chat")]
    NotHolder,

    #[error("this operation requires the admin role")]
    NotAdmin,

    #[error("this operation is only available to customers")]
    NotCustomer,

    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error("chat not found")]
    NotFound,

    /// Unexpected persistence failure — fatal for the single operation.
    #[error("store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

impl ChatError {
    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::AlreadyAssigned => "already_assigned",
            ChatError::NotHolder => "not_holder",
            ChatError::NotAdmin => "not_admin",
            ChatError::NotCustomer => "not_customer",
            ChatError::NotAuthenticated => "not_authenticated",
            ChatError::NotFound => "not_found",
            ChatError::Store(_) => "store_error",
        }
    }

    pub fn to_server_message(&self, chat_id: Option<String>) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
            chat_id,
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Store(e.into())
    }
}
