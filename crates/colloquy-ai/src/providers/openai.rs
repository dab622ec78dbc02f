//! OpenAI-compatible Chat Completions provider
//!
//! Works with any server speaking the chat completions SSE format: OpenAI,
//! Groq, OpenRouter, LM Studio, vLLM and friends. Point `base_url` at the
//! `/v1` root of the server.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{ChatProvider, error_from_response, retry_after_secs};
use crate::{
    error::{Error, Result},
    stream::FragmentStream,
    types::{ChatMessage, ModelInfo},
};

/// Default base URL for the hosted OpenAI API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    id: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIProvider {
    /// Create a provider for the given base URL. Local servers usually need no key.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            id: "openai".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Create against the hosted API using `OPENAI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(DEFAULT_BASE_URL, Some(api_key)))
    }

    /// Register under a different provider id (e.g. "groq")
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn build_request(&self, model_id: &str, messages: &[ChatMessage]) -> OpenAIRequest {
        OpenAIRequest {
            model: model_id.to_string(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let list: OpenAIModelList = response.json().await?;

        Ok(list
            .data
            .into_iter()
            .filter(|m| is_chat_model(&m.id))
            .map(|m| ModelInfo {
                id: m.id,
                provider_id: self.id.clone(),
                owned_by: m.owned_by,
            })
            .collect())
    }

    async fn send_chat(&self, model_id: &str, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let request = self.build_request(model_id, messages);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(provider = %self.id, model = model_id, "POST {}", url);

        let request_builder = self.authorized(self.client.post(&url)).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// Filter out model ids that cannot hold a conversation
fn is_chat_model(id: &str) -> bool {
    const NON_CHAT: [&str; 6] = ["embedding", "whisper", "tts", "dall-e", "moderation", "davinci"];
    !NON_CHAT.iter().any(|marker| id.contains(marker))
}

/// Extract the text delta from one SSE data payload.
fn parse_chunk(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data)?;

    if let Some(error) = chunk.error {
        return Err(Error::Sse(error.message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    Ok(if text.is_empty() { None } else { Some(text) })
}

async fn map_sse_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            Error::from_status(status.as_u16(), body, retry_after)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = Result<String>> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match parse_chunk(&msg.data) {
                        Ok(Some(delta)) => yield Ok(delta),
                        Ok(None) => {}
                        Err(e) => {
                            event_source.close();
                            yield Err(e);
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    // The event source reconnects on its own unless closed
                    event_source.close();
                    yield Err(map_sse_error(e).await);
                    return;
                }
            }
        }
        event_source.close();
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelInfo {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelList {
    data: Vec<OpenAIModelInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}
