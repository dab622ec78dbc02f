//! Conversations: the persisted record and its shared live wrapper.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use colloquy_ai::ModelRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handle::GenerationHandle;
use crate::turn::{Role, Turn};

/// Title used until the first user message names the conversation
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_MAX_CHARS: usize = 48;

/// An ordered list of turns plus the model it talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(model: Option<ModelRef>) -> Self {
        let now = Utc::now();
        let (provider_id, model_id) = match model {
            Some(m) => (Some(m.provider_id), Some(m.model_id)),
            None => (None, None),
        };
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_TITLE.to_string(),
            provider_id,
            model_id,
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
        }
    }

    /// The selected model, if both halves are set
    pub fn model(&self) -> Option<ModelRef> {
        match (&self.provider_id, &self.model_id) {
            (Some(p), Some(m)) => Some(ModelRef::new(p.clone(), m.clone())),
            _ => None,
        }
    }

    pub fn set_model(&mut self, model: ModelRef) {
        self.provider_id = Some(model.provider_id);
        self.model_id = Some(model.model_id);
        self.touch();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn(&self, id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id() == id)
    }

    pub fn turn_mut(&mut self, id: Uuid) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.id() == id)
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.turns.iter().position(|t| t.id() == id)
    }

    /// Ids of the turns that are currently streaming
    pub fn generating_turns(&self) -> Vec<Uuid> {
        self.turns
            .iter()
            .filter(|t| t.is_generating())
            .map(Turn::id)
            .collect()
    }

    pub(crate) fn push_turn(&mut self, turn: Turn) -> Uuid {
        let id = turn.id();
        self.turns.push(turn);
        self.touch();
        id
    }

    /// Drop every turn after `index`. Returns how many were removed.
    pub(crate) fn truncate_after(&mut self, index: usize) -> usize {
        let keep = (index + 1).min(self.turns.len());
        let removed = self.turns.len() - keep;
        self.turns.truncate(keep);
        if removed > 0 {
            self.touch();
        }
        removed
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Name the conversation after its first message, once.
    pub(crate) fn title_from(&mut self, text: &str) {
        if self.title != DEFAULT_TITLE {
            return;
        }
        if let Some(title) = derive_title(text) {
            self.title = title;
        }
    }

    /// Number of user turns
    pub fn message_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role() == Role::User).count()
    }

    /// Repair turns that were mid-stream when this was last saved.
    pub(crate) fn recover_interrupted(&mut self) -> bool {
        let mut changed = false;
        for turn in &mut self.turns {
            changed |= turn.recover_interrupted();
        }
        changed
    }
}

/// First line of the message, whitespace-collapsed and cut to a short length.
fn derive_title(text: &str) -> Option<String> {
    let line = text.lines().find(|l| !l.trim().is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }
    let cut: String = collapsed.chars().take(TITLE_MAX_CHARS - 1).collect();
    Some(format!("{}…", cut.trim_end()))
}

/// A conversation shared between the UI, the session, and generation tasks.
///
/// The record sits behind a synchronous lock that is never held across an
/// await. `op_lock` serializes user operations on one conversation and
/// `persist_lock` orders snapshot writes so an older snapshot never lands
/// after a newer one.
#[derive(Clone)]
pub struct LiveConversation {
    inner: Arc<LiveInner>,
}

struct LiveInner {
    id: Uuid,
    state: Mutex<Conversation>,
    generation: Mutex<Option<GenerationHandle>>,
    op_lock: tokio::sync::Mutex<()>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl LiveConversation {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                id: conversation.id,
                state: Mutex::new(conversation),
                generation: Mutex::new(None),
                op_lock: tokio::sync::Mutex::new(()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Clone of the current record
    pub fn snapshot(&self) -> Conversation {
        self.inner.state.lock().clone()
    }

    /// Borrow the record without cloning
    pub fn read<R>(&self, f: impl FnOnce(&Conversation) -> R) -> R {
        f(&self.inner.state.lock())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    pub fn title(&self) -> String {
        self.read(|c| c.title.clone())
    }

    /// The in-flight generation, if one is running
    pub fn generation(&self) -> Option<GenerationHandle> {
        self.inner
            .generation
            .lock()
            .as_ref()
            .filter(|h| h.is_running())
            .cloned()
    }

    pub fn is_generating(&self) -> bool {
        self.generation().is_some()
    }

    pub(crate) fn set_generation(&self, handle: GenerationHandle) {
        *self.inner.generation.lock() = Some(handle);
    }

    /// Clear the slot, but only if it still holds generation `id`.
    pub(crate) fn clear_generation(&self, id: Uuid) {
        let mut slot = self.inner.generation.lock();
        if slot.as_ref().is_some_and(|h| h.id() == id) {
            *slot = None;
        }
    }

    pub(crate) async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.op_lock.lock().await
    }

    pub(crate) async fn lock_persist(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.persist_lock.lock().await
    }
}

impl std::fmt::Debug for LiveConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConversation")
            .field("id", &self.inner.id)
            .field("generating", &self.is_generating())
            .finish()
    }
}
