//! Session manager: the set of conversations and which one is active.

use chrono::{DateTime, Utc};
use colloquy_ai::ModelRef;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::controller::GenerationController;
use crate::conversation::{Conversation, LiveConversation};
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::handle::GenerationHandle;

/// Sidebar row for one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_generating: bool,
}

struct SessionState {
    conversations: Vec<LiveConversation>,
    active: Uuid,
    default_model: Option<ModelRef>,
}

/// Owns every loaded conversation and tracks the active one.
///
/// Leaving a conversation cancels its generation. Empty conversations are
/// never persisted, and one that is left while still empty is dropped.
pub struct SessionManager {
    controller: GenerationController,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Load stored conversations and activate the most recently updated one,
    /// or a fresh conversation when there are none.
    pub async fn open(controller: GenerationController, default_model: Option<ModelRef>) -> Result<Self> {
        let loaded = controller.store().load().await?;
        tracing::info!("Opened session with {} stored conversations", loaded.len());

        let mut conversations: Vec<LiveConversation> =
            loaded.into_iter().map(LiveConversation::new).collect();
        let active = match most_recent(&conversations) {
            Some(recent) => recent.id(),
            None => {
                let fresh = LiveConversation::new(Conversation::new(default_model.clone()));
                let id = fresh.id();
                conversations.push(fresh);
                id
            }
        };
        let session = Self {
            controller,
            state: Mutex::new(SessionState {
                conversations,
                active,
                default_model,
            }),
        };
        session.adopt_default_model(&session.active());
        Ok(session)
    }

    pub fn controller(&self) -> &GenerationController {
        &self.controller
    }

    pub fn default_model(&self) -> Option<ModelRef> {
        self.state.lock().default_model.clone()
    }

    pub fn active(&self) -> LiveConversation {
        let mut state = self.state.lock();
        if let Some(active) = state.conversations.iter().find(|c| c.id() == state.active) {
            return active.clone();
        }
        let fallback = match state.conversations.first() {
            Some(first) => first.clone(),
            None => {
                let fresh = LiveConversation::new(Conversation::new(state.default_model.clone()));
                state.conversations.push(fresh.clone());
                fresh
            }
        };
        state.active = fallback.id();
        fallback
    }

    pub fn active_id(&self) -> Uuid {
        self.state.lock().active
    }

    pub fn get(&self, id: Uuid) -> Option<LiveConversation> {
        self.state
            .lock()
            .conversations
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Conversations, most recently updated first
    pub fn conversations(&self) -> Vec<LiveConversation> {
        let mut conversations = self.state.lock().conversations.clone();
        conversations.sort_by_key(|c| std::cmp::Reverse(c.read(|c| c.updated_at)));
        conversations
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let active = self.active_id();
        self.conversations()
            .into_iter()
            .map(|live| {
                let is_generating = live.is_generating();
                live.read(|c| ConversationSummary {
                    id: c.id,
                    title: c.title.clone(),
                    message_count: c.message_count(),
                    updated_at: c.updated_at,
                    is_active: c.id == active,
                    is_generating,
                })
            })
            .collect()
    }

    /// Start a new conversation and make it active. If the active one is
    /// still empty it is reused instead.
    pub fn new_conversation(&self) -> LiveConversation {
        let current = self.active();
        if current.read(Conversation::is_empty) {
            return current;
        }
        self.controller.cancel(&current);

        let conversation = LiveConversation::new(Conversation::new(self.default_model()));
        {
            let mut state = self.state.lock();
            state.conversations.push(conversation.clone());
            state.active = conversation.id();
        }

        tracing::debug!("Created conversation {}", conversation.id());
        self.controller.emit(ChatEvent::ActiveConversationChanged {
            conversation_id: conversation.id(),
        });
        conversation
    }

    /// Make another loaded conversation active.
    pub fn switch_to(&self, id: Uuid) -> Result<LiveConversation> {
        let target = self.get(id).ok_or(Error::ConversationNotFound(id))?;
        let current = self.active();
        if current.id() == id {
            return Ok(target);
        }

        self.controller.cancel(&current);
        {
            let mut state = self.state.lock();
            if current.read(Conversation::is_empty) {
                state.conversations.retain(|c| c.id() != current.id());
            }
            state.active = id;
        }
        self.adopt_default_model(&target);

        self.controller.emit(ChatEvent::ActiveConversationChanged { conversation_id: id });
        Ok(target)
    }

    /// Delete a conversation from memory and storage. Deleting the active
    /// conversation activates the most recent remaining one.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let target = self.get(id).ok_or(Error::ConversationNotFound(id))?;

        // An operation still saving has registered its generation by the
        // time it releases the lock; waiting on the task keeps it from
        // writing the file back after removal.
        let _ops = target.lock_ops().await;
        self.controller.cancel_and_wait(&target).await;

        let next = {
            let mut state = self.state.lock();
            state.conversations.retain(|c| c.id() != id);
            if state.active == id {
                let next = match most_recent(&state.conversations).cloned() {
                    Some(next) => next,
                    None => {
                        let fresh = LiveConversation::new(Conversation::new(state.default_model.clone()));
                        state.conversations.push(fresh.clone());
                        fresh
                    }
                };
                state.active = next.id();
                Some(next)
            } else {
                None
            }
        };

        if let Err(e) = self.controller.store().delete(id).await {
            tracing::warn!("Failed to delete conversation {} from storage: {}", id, e);
            self.controller.emit(ChatEvent::PersistFailed {
                conversation_id: id,
                message: e.to_string(),
            });
        }
        self.controller.emit(ChatEvent::ConversationDeleted { conversation_id: id });

        if let Some(next) = next {
            self.adopt_default_model(&next);
            self.controller.emit(ChatEvent::ActiveConversationChanged {
                conversation_id: next.id(),
            });
        }

        Ok(())
    }

    /// Delete everything and start over with one empty conversation.
    pub async fn clear_all(&self) -> LiveConversation {
        let all = self.state.lock().conversations.clone();
        for conversation in &all {
            let _ops = conversation.lock_ops().await;
            self.controller.cancel_and_wait(conversation).await;
        }

        if let Err(e) = self.controller.store().clear().await {
            tracing::warn!("Failed to clear stored conversations: {}", e);
        }
        for conversation in &all {
            self.controller.emit(ChatEvent::ConversationDeleted {
                conversation_id: conversation.id(),
            });
        }

        let fresh = LiveConversation::new(Conversation::new(self.default_model()));
        {
            let mut state = self.state.lock();
            state.conversations = vec![fresh.clone()];
            state.active = fresh.id();
        }
        tracing::info!("Cleared {} conversations", all.len());
        self.controller.emit(ChatEvent::ActiveConversationChanged {
            conversation_id: fresh.id(),
        });
        fresh
    }

    /// Use `model` for the active conversation and for new ones.
    pub async fn select_model(&self, model: ModelRef) {
        self.state.lock().default_model = Some(model.clone());

        let active = self.active();
        let has_turns = active.update(|c| {
            c.set_model(model);
            !c.is_empty()
        });
        self.controller.emit(ChatEvent::ConversationUpdated {
            conversation_id: active.id(),
        });
        if has_turns {
            self.controller.persist(&active).await;
        }
    }

    pub async fn send(&self, text: &str, context: Option<&str>) -> Result<Option<GenerationHandle>> {
        self.controller.send(&self.active(), text, context).await
    }

    pub async fn regenerate(&self, turn_id: Uuid) -> Result<Option<GenerationHandle>> {
        self.controller.regenerate(&self.active(), turn_id).await
    }

    pub async fn edit_and_resend(&self, turn_id: Uuid, new_text: &str) -> Result<Option<GenerationHandle>> {
        self.controller.edit_and_resend(&self.active(), turn_id, new_text).await
    }

    pub async fn select_response(&self, turn_id: Uuid, index: usize) -> Result<()> {
        self.controller.select_response(&self.active(), turn_id, index).await
    }

    pub async fn clear_alternates(&self, turn_id: Uuid) -> Result<()> {
        self.controller.clear_alternates(&self.active(), turn_id).await
    }

    /// Cancel the active conversation's generation, if any
    pub fn cancel(&self) -> bool {
        self.controller.cancel(&self.active())
    }

    pub async fn cancel_and_wait(&self) {
        self.controller.cancel_and_wait(&self.active()).await
    }

    /// A conversation without a model picks up the session default.
    fn adopt_default_model(&self, conversation: &LiveConversation) {
        let Some(model) = self.default_model() else {
            return;
        };
        conversation.update(|c| {
            if c.model().is_none() {
                c.provider_id = Some(model.provider_id);
                c.model_id = Some(model.model_id);
            }
        });
    }
}

fn most_recent(conversations: &[LiveConversation]) -> Option<&LiveConversation> {
    conversations.iter().max_by_key(|c| c.read(|c| c.updated_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::GenerationConfig;
    use crate::store::{ConversationStore, MemoryStore};
    use crate::test_support::{
        Reply, ScriptedProvider, SlowStore, controller_with, controller_with_store, next_fragment,
        scripted_model,
    };
    use crate::turn::{ResponseStatus, Turn};
    use std::sync::Arc;
    use std::time::Duration;

    /// A session whose saves take 100ms, with a send already inside its first save
    async fn send_during_slow_save() -> (
        Arc<SessionManager>,
        Arc<SlowStore>,
        Arc<ScriptedProvider>,
        LiveConversation,
        tokio::task::JoinHandle<Result<Option<GenerationHandle>>>,
    ) {
        let provider = ScriptedProvider::new(vec![]);
        provider.push(Reply::fragments(&["never shown"]));
        let store = Arc::new(SlowStore::new(Duration::from_millis(100)));
        let controller = controller_with_store(&provider, store.clone(), GenerationConfig::default());
        let session = Arc::new(SessionManager::open(controller, Some(scripted_model())).await.unwrap());

        let conversation = session.active();
        let sending = tokio::spawn({
            let session = session.clone();
            async move { session.send("hello", None).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(conversation.is_generating());
        (session, store, provider, conversation, sending)
    }

    async fn open_with(
        provider: &Arc<ScriptedProvider>,
        model: Option<ModelRef>,
    ) -> (SessionManager, Arc<MemoryStore>) {
        let (controller, store) = controller_with(provider, GenerationConfig::default());
        let session = SessionManager::open(controller, model).await.unwrap();
        (session, store)
    }

    #[tokio::test]
    async fn test_open_empty_store_creates_unsaved_conversation() {
        let provider = ScriptedProvider::new(vec![]);
        let (session, store) = open_with(&provider, Some(scripted_model())).await;

        let active = session.active();
        assert!(active.snapshot().is_empty());
        assert_eq!(active.snapshot().model(), Some(scripted_model()));
        assert_eq!(session.summaries().len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_open_activates_most_recent_and_recovers() {
        let provider = ScriptedProvider::new(vec![]);
        let (controller, store) = controller_with(&provider, GenerationConfig::default());

        let mut older = Conversation::new(Some(scripted_model()));
        older.push_turn(Turn::user("old"));
        let mut newer = Conversation::new(Some(scripted_model()));
        newer.push_turn(Turn::user("new"));
        let mut streaming = Turn::assistant_streaming();
        streaming.push_fragment("half");
        let turn_id = newer.push_turn(streaming);
        newer.updated_at = older.updated_at + chrono::Duration::seconds(10);
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let session = SessionManager::open(controller, None).await.unwrap();
        assert_eq!(session.active_id(), newer.id);
        let turn = session.active().snapshot().turn(turn_id).cloned().unwrap();
        assert_eq!(turn.status(), Some(ResponseStatus::Failed));
        assert_eq!(turn.text(), "half");

        let ids: Vec<_> = session.summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_active_recovers_from_stale_state() {
        let provider = ScriptedProvider::new(vec![]);
        let (session, _store) = open_with(&provider, Some(scripted_model())).await;
        let only = session.active();

        session.state.lock().active = Uuid::new_v4();
        assert_eq!(session.active().id(), only.id());
        assert_eq!(session.active_id(), only.id());

        session.state.lock().conversations.clear();
        let fresh = session.active();
        assert_ne!(fresh.id(), only.id());
        assert_eq!(session.active_id(), fresh.id());
        assert_eq!(session.summaries().len(), 1);
    }

    #[tokio::test]
    async fn test_new_conversation_reuses_empty_active() {
        let provider = ScriptedProvider::new(vec![]);
        let (session, _store) = open_with(&provider, Some(scripted_model())).await;

        let first = session.active();
        let again = session.new_conversation();
        assert_eq!(first.id(), again.id());
        assert_eq!(session.summaries().len(), 1);
    }

    #[tokio::test]
    async fn test_new_conversation_cancels_generation_being_left() {
        let provider = ScriptedProvider::new(vec![]);
        let tx = provider.channel();
        let (session, store) = open_with(&provider, Some(scripted_model())).await;
        let mut events = session.controller().subscribe();

        let left = session.active();
        let handle = session.send("long story please", None).await.unwrap().unwrap();
        tx.send(Ok("Once".into())).unwrap();
        next_fragment(&mut events).await;

        let fresh = session.new_conversation();
        assert_ne!(fresh.id(), left.id());
        assert_eq!(session.active_id(), fresh.id());
        handle.wait().await;

        let turn = left.snapshot().turn(handle.turn_id()).cloned().unwrap();
        assert_eq!(turn.status(), Some(ResponseStatus::Cancelled));
        assert_eq!(turn.text(), "Once");
        assert_eq!(store.get(left.id()).unwrap().turn(turn.id()), Some(&turn));
        assert_eq!(session.summaries().len(), 2);
    }

    #[tokio::test]
    async fn test_leaving_while_first_save_runs_cancels_generation() {
        let (session, store, provider, left, sending) = send_during_slow_save().await;

        let fresh = session.new_conversation();
        assert_ne!(fresh.id(), left.id());

        let handle = sending.await.unwrap().unwrap().unwrap();
        handle.wait().await;
        assert!(!left.is_generating());
        let turn = left.snapshot().turn(handle.turn_id()).cloned().unwrap();
        assert_eq!(turn.status(), Some(ResponseStatus::Cancelled));
        assert!(provider.requests().is_empty());
        assert_eq!(store.get(left.id()).unwrap().turn(turn.id()), Some(&turn));
    }

    #[tokio::test]
    async fn test_delete_while_first_save_runs_stays_deleted() {
        let (session, store, _provider, target, sending) = send_during_slow_save().await;

        session.delete(target.id()).await.unwrap();
        let handle = sending.await.unwrap().unwrap().unwrap();
        assert!(!handle.is_running());
        assert!(!target.is_generating());
        assert!(session.get(target.id()).is_none());
        assert!(store.get(target.id()).is_none());
    }

    #[tokio::test]
    async fn test_switch_to() {
        let provider = ScriptedProvider::new(vec![Reply::fragments(&["4"])]);
        let (session, _store) = open_with(&provider, Some(scripted_model())).await;

        let first = session.active();
        session.send("2+2?", None).await.unwrap().unwrap().wait().await;
        let second = session.new_conversation();

        let switched = session.switch_to(first.id()).unwrap();
        assert_eq!(switched.id(), first.id());
        assert_eq!(session.active_id(), first.id());
        // The empty conversation we left is dropped
        assert!(session.get(second.id()).is_none());

        let missing = Uuid::new_v4();
        assert!(matches!(
            session.switch_to(missing),
            Err(Error::ConversationNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_delete_active_activates_next() {
        let provider = ScriptedProvider::new(vec![Reply::fragments(&["a"]), Reply::fragments(&["b"])]);
        let (session, store) = open_with(&provider, Some(scripted_model())).await;

        let first = session.active();
        session.send("one", None).await.unwrap().unwrap().wait().await;
        let second = session.new_conversation();
        session.send("two", None).await.unwrap().unwrap().wait().await;
        assert_eq!(store.len(), 2);

        session.delete(second.id()).await.unwrap();
        assert_eq!(session.active_id(), first.id());
        assert!(store.get(second.id()).is_none());
        assert!(session.get(second.id()).is_none());

        session.delete(first.id()).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(session.summaries().len(), 1);
        assert!(session.active().snapshot().is_empty());

        assert!(matches!(
            session.delete(first.id()).await,
            Err(Error::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let provider = ScriptedProvider::new(vec![]);
        let (session, store) = open_with(&provider, Some(scripted_model())).await;
        session.send("one", None).await.unwrap().unwrap().wait().await;
        session.new_conversation();
        session.send("two", None).await.unwrap().unwrap().wait().await;

        let fresh = session.clear_all().await;
        assert!(store.is_empty());
        assert_eq!(session.summaries().len(), 1);
        assert_eq!(session.active_id(), fresh.id());
        assert!(fresh.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_select_model() {
        let provider = ScriptedProvider::new(vec![]);
        let (session, store) = open_with(&provider, None).await;

        let handle = session.send("hi", None).await.unwrap();
        assert!(handle.is_none());
        let failed = session.active().snapshot().turns()[1].clone();
        assert_eq!(failed.status(), Some(ResponseStatus::Failed));

        session.select_model(scripted_model()).await;
        let active = session.active();
        assert_eq!(active.snapshot().model(), Some(scripted_model()));
        assert_eq!(store.get(active.id()).unwrap().model(), Some(scripted_model()));

        let fresh = session.new_conversation();
        assert_eq!(fresh.snapshot().model(), Some(scripted_model()));

        session.send("hi again", None).await.unwrap().unwrap().wait().await;
        assert_eq!(fresh.snapshot().turns()[1].text(), "ok");
    }

    #[tokio::test]
    async fn test_regenerate_then_page_through_active() {
        let provider = ScriptedProvider::new(vec![Reply::fragments(&["4"]), Reply::fragments(&["It's 4."])]);
        let (session, _store) = open_with(&provider, Some(scripted_model())).await;

        let handle = session.send("2+2?", None).await.unwrap().unwrap();
        handle.wait().await;
        let turn_id = handle.turn_id();
        session.regenerate(turn_id).await.unwrap().unwrap().wait().await;
        session.select_response(turn_id, 0).await.unwrap();

        let turn = session.active().snapshot().turn(turn_id).cloned().unwrap();
        assert_eq!(turn.current_index(), 0);
        assert_eq!(turn.responses().len(), 2);
        assert!(!session.cancel());
        session.cancel_and_wait().await;
    }
}
