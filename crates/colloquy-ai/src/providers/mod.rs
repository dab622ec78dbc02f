//! Chat provider implementations

pub mod ollama;
pub mod openai;

use crate::{ChatMessage, Error, FragmentStream, ModelInfo, Result};
use async_trait::async_trait;

/// Capability interface every chat backend implements.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Identifier the provider is registered under (e.g. "ollama")
    fn id(&self) -> &str;

    /// List the models this provider can serve
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Send a chat turn and return the streamed reply as text fragments
    async fn send_chat(&self, model_id: &str, messages: &[ChatMessage]) -> Result<FragmentStream>;
}

/// Get an API key from the provided value or an environment variable
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

/// Parse a `Retry-After` header given in whole seconds
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Turn a non-success response into an error, consuming its body
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let retry_after = retry_after_secs(response.headers());
    let body = response.text().await.unwrap_or_default();
    Error::from_status(status, body, retry_after)
}
