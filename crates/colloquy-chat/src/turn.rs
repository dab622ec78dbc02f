//! Turns and their response sets

use chrono::{DateTime, Utc};
use colloquy_ai::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Shown when a version was still streaming when the app went away.
pub const INTERRUPTED_NOTICE: &str = "Generation was interrupted before it finished.";

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of one response version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Fragments are still arriving
    Streaming,
    Completed,
    /// Stopped by the user; partial text is kept
    Cancelled,
    /// Text holds a diagnostic instead of model output
    Failed,
}

impl ResponseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseStatus::Streaming)
    }
}

/// Whether a turn is receiving fragments right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
}

/// One version of an assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub status: ResponseStatus,
}

/// One entry in a conversation.
///
/// For assistant turns `text` always mirrors `responses[current_index]`.
/// User turns carry no responses and are edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    id: Uuid,
    role: Role,
    created_at: DateTime<Utc>,
    text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    responses: Vec<Response>,
    #[serde(default)]
    current_index: usize,
}

impl Turn {
    fn new(role: Role, text: String, responses: Vec<Response>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            created_at: Utc::now(),
            text,
            responses,
            current_index: 0,
        }
    }

    /// A user turn with the given content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), Vec::new())
    }

    /// An assistant turn with a single empty version that is about to stream
    pub fn assistant_streaming() -> Self {
        Self::new(
            Role::Assistant,
            String::new(),
            vec![Response {
                text: String::new(),
                status: ResponseStatus::Streaming,
            }],
        )
    }

    /// A synthetic assistant turn carrying a diagnostic
    pub fn assistant_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            Role::Assistant,
            message.clone(),
            vec![Response {
                text: message,
                status: ResponseStatus::Failed,
            }],
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Texts of every version, oldest first
    pub fn response_texts(&self) -> Vec<&str> {
        self.responses.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_response(&self) -> Option<&Response> {
        self.responses.get(self.current_index)
    }

    /// Status of the displayed version; user turns have none
    pub fn status(&self) -> Option<ResponseStatus> {
        self.current_response().map(|r| r.status)
    }

    pub fn generation_state(&self) -> GenerationState {
        if self.status() == Some(ResponseStatus::Streaming) {
            GenerationState::Generating
        } else {
            GenerationState::Idle
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generation_state() == GenerationState::Generating
    }

    /// Replace a user turn's text. Destructive: user turns have one version.
    pub fn set_user_text(&mut self, text: impl Into<String>) -> Result<()> {
        if self.role != Role::User {
            return Err(Error::NotUserTurn(self.id));
        }
        self.text = text.into();
        Ok(())
    }

    /// Append a new empty streaming version, select it, and return its index.
    pub(crate) fn begin_response(&mut self) -> usize {
        self.responses.push(Response {
            text: String::new(),
            status: ResponseStatus::Streaming,
        });
        self.current_index = self.responses.len() - 1;
        self.text.clear();
        self.current_index
    }

    /// Append a version that failed before producing anything.
    pub(crate) fn push_failed_response(&mut self, message: impl Into<String>) -> usize {
        let message = message.into();
        self.responses.push(Response {
            text: message.clone(),
            status: ResponseStatus::Failed,
        });
        self.current_index = self.responses.len() - 1;
        self.text = message;
        self.current_index
    }

    /// Append a fragment to the streaming version. Returns false when the
    /// displayed version is not streaming (nothing is applied).
    pub(crate) fn push_fragment(&mut self, fragment: &str) -> bool {
        match self.responses.get_mut(self.current_index) {
            Some(response) if response.status == ResponseStatus::Streaming => {
                response.text.push_str(fragment);
                self.text.push_str(fragment);
                true
            }
            _ => false,
        }
    }

    /// Move the streaming version to a terminal status, keeping its text.
    pub(crate) fn finish_response(&mut self, status: ResponseStatus) {
        if let Some(response) = self.responses.get_mut(self.current_index) {
            if response.status == ResponseStatus::Streaming {
                response.status = status;
            }
        }
    }

    /// Mark the streaming version failed and show `message` instead of its text.
    pub(crate) fn fail_response(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(response) = self.responses.get_mut(self.current_index) {
            if response.status == ResponseStatus::Streaming {
                response.status = ResponseStatus::Failed;
                response.text = message.clone();
                self.text = message;
            }
        }
    }

    /// Show another version of this turn.
    pub fn select_response(&mut self, index: usize) -> Result<()> {
        let Some(response) = self.responses.get(index) else {
            return Err(Error::InvalidResponseIndex {
                index,
                count: self.responses.len(),
            });
        };
        self.text = response.text.clone();
        self.current_index = index;
        Ok(())
    }

    /// Drop every version except the displayed one.
    pub fn clear_alternates(&mut self) {
        if self.responses.len() <= 1 {
            return;
        }
        let kept = self.responses.swap_remove(self.current_index);
        self.responses = vec![kept];
        self.current_index = 0;
    }

    /// Repair state read back from storage: a streaming version means the
    /// process died mid-generation, so it becomes a failure. Also re-derives
    /// `text` and clamps `current_index`. Returns true if anything changed.
    pub(crate) fn recover_interrupted(&mut self) -> bool {
        if self.role == Role::User || self.responses.is_empty() {
            return false;
        }

        let mut changed = false;
        for response in &mut self.responses {
            if response.status == ResponseStatus::Streaming {
                response.status = ResponseStatus::Failed;
                if response.text.trim().is_empty() {
                    response.text = INTERRUPTED_NOTICE.to_string();
                }
                changed = true;
            }
        }

        if self.current_index >= self.responses.len() {
            self.current_index = self.responses.len() - 1;
            changed = true;
        }

        let current = &self.responses[self.current_index].text;
        if self.text != *current {
            self.text = current.clone();
            changed = true;
        }

        changed
    }

    /// Whether this turn should be replayed to the provider as history.
    /// Failed and empty assistant versions are diagnostics, not dialogue.
    pub(crate) fn is_usable_context(&self) -> bool {
        match self.role {
            Role::User => !self.text.trim().is_empty(),
            Role::Assistant => {
                matches!(
                    self.status(),
                    Some(ResponseStatus::Completed | ResponseStatus::Cancelled)
                ) && !self.text.trim().is_empty()
            }
        }
    }

    pub(crate) fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user(self.text.clone()),
            Role::Assistant => ChatMessage::assistant(self.text.clone()),
        }
    }
}
