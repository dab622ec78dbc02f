//! Error types for colloquy-chat

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Result type alias using colloquy-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the conversation and generation layer
#[derive(Error, Debug)]
pub enum Error {
    /// The conversation has no provider/model pair to send to
    #[error("No model selected")]
    NoModelSelected,

    /// The provider rejected our credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The provider asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// Transport failure, bad payload, or any other provider-side problem
    #[error("Network error: {0}")]
    Network(String),

    /// Saving or loading conversations failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Message is empty")]
    EmptyMessage,

    /// Only one generation may run per conversation
    #[error("A response is already being generated in this conversation")]
    AlreadyGenerating,

    #[error("Turn not found: {0}")]
    TurnNotFound(Uuid),

    #[error("Turn {0} is not an assistant turn")]
    NotAssistantTurn(Uuid),

    #[error("Turn {0} is not a user turn")]
    NotUserTurn(Uuid),

    #[error("Response index {index} is out of range ({count} versions)")]
    InvalidResponseIndex { index: usize, count: usize },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),
}

impl From<colloquy_ai::Error> for Error {
    fn from(error: colloquy_ai::Error) -> Self {
        use colloquy_ai::Error as Ai;

        if error.is_auth_failure() {
            return match error {
                Ai::Auth(detail) => Error::Auth(detail),
                other => Error::Auth(other.to_string()),
            };
        }

        match error {
            Ai::RateLimited {
                retry_after: Some(secs),
            } => Error::RateLimit(format!("retry after {} seconds", secs)),
            Ai::RateLimited { retry_after: None } => Error::RateLimit("try again shortly".into()),
            other if other.is_rate_limited() => Error::RateLimit(other.to_string()),
            other => Error::Network(other.to_string()),
        }
    }
}

impl Error {
    /// Text stored in a failed response version so the user sees what went wrong.
    pub fn user_message(&self) -> String {
        match self {
            Error::NoModelSelected => "Please select a model before sending a message.".to_string(),
            Error::Auth(detail) => format!(
                "Authentication failed. Check the API key configured for this provider. ({})",
                detail
            ),
            Error::RateLimit(detail) => format!(
                "Rate limited by the provider ({}). Wait a moment, then regenerate.",
                detail
            ),
            Error::Network(detail) => format!("Network error: {}", detail),
            other => other.to_string(),
        }
    }
}
