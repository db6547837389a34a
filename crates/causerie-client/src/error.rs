use thiserror::Error;

use causerie_shared::{ConversationId, MessageId, ProtocolError, UserId};
use causerie_store::StoreError;

/// Errors surfaced by the session layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No key pair is active yet; call `KeyManager::initialize` first.
    #[error("Key manager not initialized")]
    NotInitialized,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message {message} not found in {conversation}")]
    MessageNotFound {
        conversation: ConversationId,
        message: MessageId,
    },

    /// Participant list refers to the local user where it must not, or to
    /// someone who is not part of the conversation.
    #[error("Invalid participant: {0}")]
    InvalidParticipant(UserId),

    #[error("{user} is not allowed to {action}")]
    PermissionDenied { user: UserId, action: &'static str },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ClientError {
    /// Whether the session can keep going after this error. Only a missing
    /// identity is fatal for every operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ClientError::NotInitialized)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
