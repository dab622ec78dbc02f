//! Ollama local daemon provider
//!
//! Talks to `/api/chat`, which streams one JSON object per line.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{ChatProvider, error_from_response};
use crate::{
    error::{Error, Result},
    stream::{FragmentStream, LineBuffer},
    types::{ChatMessage, ModelInfo},
};

/// Where a default Ollama install listens
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let tags: OllamaTags = response.json().await?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name,
                provider_id: "ollama".to_string(),
                owned_by: m.details.and_then(|d| d.family),
            })
            .collect())
    }

    async fn send_chat(&self, model_id: &str, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let request = OllamaRequest {
            model: model_id.to_string(),
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
        };

        tracing::debug!(model = model_id, "POST {}/api/chat", self.base_url);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(Box::pin(create_stream(response)))
    }
}

/// What one NDJSON line contributed
#[derive(Debug, PartialEq)]
struct LineOutcome {
    delta: String,
    done: bool,
}

fn parse_line(line: &str) -> Result<LineOutcome> {
    let chunk: OllamaChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(Error::UnexpectedResponse(error));
    }
    Ok(LineOutcome {
        delta: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    })
}

fn create_stream(response: reqwest::Response) -> impl futures::Stream<Item = Result<String>> {
    stream! {
        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(Error::Http(e));
                    return;
                }
            };

            for line in lines.push(&chunk) {
                match parse_line(&line) {
                    Ok(outcome) => {
                        if !outcome.delta.is_empty() {
                            yield Ok(outcome.delta);
                        }
                        if outcome.done {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if let Some(line) = lines.finish() {
            match parse_line(&line) {
                Ok(outcome) if !outcome.delta.is_empty() => yield Ok(outcome.delta),
                Ok(_) => {}
                Err(e) => yield Err(e),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
    #[serde(default)]
    details: Option<OllamaTagDetails>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagDetails {
    #[serde(default)]
    family: Option<String>,
}
