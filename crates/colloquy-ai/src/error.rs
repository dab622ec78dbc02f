//! Error types for colloquy-ai

use thiserror::Error;

/// Result type alias using colloquy-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// No provider registered under this id
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl Error {
    /// Create an API error from a status code and body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status to the matching error variant.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<u64>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Error::Auth(if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body
            }),
            429 => Error::RateLimited { retry_after },
            _ => Error::api(status, body),
        }
    }

    /// Check if this error means the credentials were rejected
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Auth(_) | Error::InvalidApiKey => true,
            Error::Api { status, .. } => *status == 401 || *status == 403,
            Error::Http(e) => e
                .status()
                .is_some_and(|s| s.as_u16() == 401 || s.as_u16() == 403),
            _ => false,
        }
    }

    /// Check if this error means the provider is throttling us
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            Error::Api { status, message } => {
                let msg = message.to_lowercase();
                *status == 429
                    || msg.contains("rate limit")
                    || msg.contains("rate_limit")
                    || msg.contains("too many requests")
            }
            Error::Http(e) => e.status().is_some_and(|s| s.as_u16() == 429),
            _ => false,
        }
    }
}
