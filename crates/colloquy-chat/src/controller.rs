//! Generation controller: starts, streams, cancels and finalizes replies.
//!
//! Every generation runs on its own task. The task owns the provider
//! stream, applies fragments to the conversation under its lock, and on a
//! terminal outcome moves the version to `Completed`, `Cancelled` or
//! `Failed`, persists, and broadcasts `GenerationFinished`. At most one
//! generation runs per conversation.

use std::sync::Arc;

use colloquy_ai::{ChatMessage, FragmentStream, ModelInfo, ModelRef, ProviderGateway};
use futures::StreamExt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::conversation::LiveConversation;
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::handle::GenerationHandle;
use crate::store::ConversationStore;
use crate::turn::{ResponseStatus, Role, Turn};

/// Tunables for building requests and checkpointing streams
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Sent first on every request when set
    pub system_prompt: Option<String>,
    /// How many earlier turns to replay before the prompt
    pub history_window: usize,
    /// Persist a streaming conversation every N fragments (0 = only at the end)
    pub checkpoint_every: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_window: 10,
            checkpoint_every: 32,
        }
    }
}

/// How a generation ended
enum Outcome {
    Completed,
    Cancelled,
    Failed(Error),
}

/// Drives generations for any number of conversations.
///
/// Cloning is cheap; clones share the gateway, store and event channel.
#[derive(Clone)]
pub struct GenerationController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    gateway: ProviderGateway,
    store: Arc<dyn ConversationStore>,
    config: GenerationConfig,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl GenerationController {
    pub fn new(
        gateway: ProviderGateway,
        store: Arc<dyn ConversationStore>,
        config: GenerationConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ControllerInner {
                gateway,
                store,
                config,
                event_tx,
            }),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.inner.gateway
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.store
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Models offered by one provider
    pub async fn list_models(&self, provider_id: &str) -> Result<Vec<ModelInfo>> {
        Ok(self.inner.gateway.list_models(provider_id).await?)
    }

    /// Append a user turn and start streaming the reply into a new assistant turn.
    ///
    /// `context` is prefixed to the stored user message inside a
    /// `<context>` block. Without a selected model the reply is a failed
    /// turn explaining that, and `None` is returned.
    pub async fn send(
        &self,
        conversation: &LiveConversation,
        text: &str,
        context: Option<&str>,
    ) -> Result<Option<GenerationHandle>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let _ops = conversation.lock_ops().await;
        if conversation.is_generating() {
            return Err(Error::AlreadyGenerating);
        }

        let content = compose_user_content(text, context);
        let model = conversation.update(|c| {
            c.title_from(text);
            c.push_turn(Turn::user(content));
            c.model()
        });

        self.start_reply(conversation, model).await
    }

    /// Append a new version to an assistant turn, built from every turn before it.
    /// Earlier versions are kept; the new one becomes current.
    pub async fn regenerate(
        &self,
        conversation: &LiveConversation,
        turn_id: Uuid,
    ) -> Result<Option<GenerationHandle>> {
        let _ops = conversation.lock_ops().await;
        if conversation.is_generating() {
            return Err(Error::AlreadyGenerating);
        }

        let prepared = conversation.update(|c| -> Result<Option<(usize, ModelRef, Vec<ChatMessage>)>> {
            let position = c.position(turn_id).ok_or(Error::TurnNotFound(turn_id))?;
            if c.turns()[position].role() != Role::Assistant {
                return Err(Error::NotAssistantTurn(turn_id));
            }

            let messages = self.build_messages(&c.turns()[..position]);
            let model = c.model();
            c.touch();

            let Some(turn) = c.turn_mut(turn_id) else {
                return Err(Error::TurnNotFound(turn_id));
            };
            Ok(match model {
                Some(model) => Some((turn.begin_response(), model, messages)),
                None => {
                    turn.push_failed_response(Error::NoModelSelected.user_message());
                    None
                }
            })
        })?;

        match prepared {
            Some((index, model, messages)) => {
                let handle = self.register_generation(conversation, turn_id, index);
                self.persist(conversation).await;
                self.launch(conversation, handle.clone(), model, messages);
                Ok(Some(handle))
            }
            None => {
                self.emit(ChatEvent::ConversationUpdated {
                    conversation_id: conversation.id(),
                });
                self.persist(conversation).await;
                Ok(None)
            }
        }
    }

    /// Replace a user turn's text, drop every later turn, and generate a fresh reply.
    /// A generation already running in this conversation is cancelled first.
    pub async fn edit_and_resend(
        &self,
        conversation: &LiveConversation,
        turn_id: Uuid,
        new_text: &str,
    ) -> Result<Option<GenerationHandle>> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let _ops = conversation.lock_ops().await;
        conversation.read(|c| match c.turn(turn_id) {
            None => Err(Error::TurnNotFound(turn_id)),
            Some(turn) if turn.role() != Role::User => Err(Error::NotUserTurn(turn_id)),
            Some(_) => Ok(()),
        })?;

        self.cancel_and_wait(conversation).await;

        let model = conversation.update(|c| -> Result<Option<ModelRef>> {
            let position = c.position(turn_id).ok_or(Error::TurnNotFound(turn_id))?;
            if let Some(turn) = c.turn_mut(turn_id) {
                turn.set_user_text(new_text)?;
            }
            let removed = c.truncate_after(position);
            tracing::debug!("Edit of turn {} dropped {} later turns", turn_id, removed);
            c.touch();
            Ok(c.model())
        })?;

        self.start_reply(conversation, model).await
    }

    /// Request cancellation of the conversation's active generation.
    /// Returns false when nothing was running. Never blocks.
    pub fn cancel(&self, conversation: &LiveConversation) -> bool {
        match conversation.generation() {
            Some(handle) => {
                tracing::debug!("Cancelling generation {}", handle.id());
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and wait until the version is terminal and persisted.
    pub async fn cancel_and_wait(&self, conversation: &LiveConversation) {
        if let Some(handle) = conversation.generation() {
            handle.cancel();
            handle.wait().await;
        }
    }

    /// Show a different version of an assistant turn.
    pub async fn select_response(
        &self,
        conversation: &LiveConversation,
        turn_id: Uuid,
        index: usize,
    ) -> Result<()> {
        let _ops = conversation.lock_ops().await;
        conversation.update(|c| -> Result<()> {
            let turn = c.turn_mut(turn_id).ok_or(Error::TurnNotFound(turn_id))?;
            if turn.is_generating() {
                return Err(Error::AlreadyGenerating);
            }
            turn.select_response(index)?;
            c.touch();
            Ok(())
        })?;

        self.emit(ChatEvent::ConversationUpdated {
            conversation_id: conversation.id(),
        });
        self.persist(conversation).await;
        Ok(())
    }

    /// Drop every version of a turn except the one shown.
    pub async fn clear_alternates(&self, conversation: &LiveConversation, turn_id: Uuid) -> Result<()> {
        let _ops = conversation.lock_ops().await;
        conversation.update(|c| -> Result<()> {
            let turn = c.turn_mut(turn_id).ok_or(Error::TurnNotFound(turn_id))?;
            if turn.role() != Role::Assistant {
                return Err(Error::NotAssistantTurn(turn_id));
            }
            if turn.is_generating() {
                return Err(Error::AlreadyGenerating);
            }
            turn.clear_alternates();
            c.touch();
            Ok(())
        })?;

        self.emit(ChatEvent::ConversationUpdated {
            conversation_id: conversation.id(),
        });
        self.persist(conversation).await;
        Ok(())
    }

    /// Write the current snapshot. Failures are logged and broadcast, never
    /// rolled back: memory stays authoritative.
    pub(crate) async fn persist(&self, conversation: &LiveConversation) -> bool {
        let _guard = conversation.lock_persist().await;
        let snapshot = conversation.snapshot();
        match self.inner.store.save(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save conversation {}: {}", snapshot.id, e);
                self.emit(ChatEvent::PersistFailed {
                    conversation_id: snapshot.id,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Append an assistant turn answering the last user turn.
    async fn start_reply(
        &self,
        conversation: &LiveConversation,
        model: Option<ModelRef>,
    ) -> Result<Option<GenerationHandle>> {
        let Some(model) = model else {
            let notice = Error::NoModelSelected.user_message();
            conversation.update(|c| c.push_turn(Turn::assistant_failed(notice)));
            self.emit(ChatEvent::ConversationUpdated {
                conversation_id: conversation.id(),
            });
            self.persist(conversation).await;
            return Ok(None);
        };

        let (turn_id, messages) = conversation.update(|c| {
            let messages = self.build_messages(c.turns());
            (c.push_turn(Turn::assistant_streaming()), messages)
        });
        self.emit(ChatEvent::ConversationUpdated {
            conversation_id: conversation.id(),
        });
        let handle = self.register_generation(conversation, turn_id, 0);
        self.persist(conversation).await;

        self.launch(conversation, handle.clone(), model, messages);
        Ok(Some(handle))
    }

    /// System prompt, a window of earlier turns, then the prompting turn.
    /// Failed and empty replies are left out.
    fn build_messages(&self, turns: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(prompt) = self
            .inner
            .config
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            messages.push(ChatMessage::system(prompt));
        }

        let usable: Vec<&Turn> = turns.iter().filter(|t| t.is_usable_context()).collect();
        let Some((prompt, history)) = usable.split_last() else {
            return messages;
        };
        let start = history.len().saturating_sub(self.inner.config.history_window);
        messages.extend(history[start..].iter().map(|t| t.to_chat_message()));
        messages.push(prompt.to_chat_message());
        messages
    }

    /// Install the handle for a streaming version. Must run before the
    /// caller's first await so cancel and leave operations always see it.
    fn register_generation(
        &self,
        conversation: &LiveConversation,
        turn_id: Uuid,
        response_index: usize,
    ) -> GenerationHandle {
        let handle = GenerationHandle::new(conversation.id(), turn_id);
        conversation.set_generation(handle.clone());
        self.emit(ChatEvent::GenerationStarted {
            conversation_id: conversation.id(),
            turn_id,
            response_index,
        });
        handle
    }

    /// Spawn the task for a registered handle. A handle cancelled while
    /// the caller was saving finishes as `Cancelled` without a request.
    fn launch(
        &self,
        conversation: &LiveConversation,
        handle: GenerationHandle,
        model: ModelRef,
        messages: Vec<ChatMessage>,
    ) {
        tracing::info!(
            conversation = %conversation.id(),
            model = %model,
            "Starting generation with {} messages",
            messages.len()
        );

        let controller = self.clone();
        let conversation = conversation.clone();
        tokio::spawn(async move {
            controller
                .run_generation(conversation, handle, model, messages)
                .await;
        });
    }

    async fn run_generation(
        self,
        conversation: LiveConversation,
        handle: GenerationHandle,
        model: ModelRef,
        messages: Vec<ChatMessage>,
    ) {
        let cancel = handle.cancel_token().clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.inner.gateway.send_chat(&model.provider_id, &model.model_id, &messages) => Some(result),
        };

        let outcome = match opened {
            None => Outcome::Cancelled,
            Some(Err(e)) => Outcome::Failed(e.into()),
            Some(Ok(stream)) => self.consume(&conversation, &handle, stream).await,
        };

        self.finish(&conversation, &handle, outcome).await;
    }

    /// Apply fragments until the stream ends, errors, or we are cancelled.
    /// The stream is dropped on return, which releases the transport.
    async fn consume(
        &self,
        conversation: &LiveConversation,
        handle: &GenerationHandle,
        mut stream: FragmentStream,
    ) -> Outcome {
        let cancel = handle.cancel_token();
        let checkpoint_every = self.inner.config.checkpoint_every;
        let mut applied = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                next = stream.next() => next,
            };

            let fragment = match next {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => return Outcome::Failed(e.into()),
                None => return Outcome::Completed,
            };
            if fragment.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let accepted = conversation.update(|c| {
                c.turn_mut(handle.turn_id())
                    .is_some_and(|turn| turn.push_fragment(&fragment))
            });
            if !accepted {
                tracing::debug!("Turn {} is no longer streaming; stopping", handle.turn_id());
                return Outcome::Cancelled;
            }

            self.emit(ChatEvent::Fragment {
                conversation_id: conversation.id(),
                turn_id: handle.turn_id(),
                delta: fragment,
            });

            applied += 1;
            if checkpoint_every > 0 && applied % checkpoint_every == 0 {
                self.persist(conversation).await;
            }
        }
    }

    async fn finish(&self, conversation: &LiveConversation, handle: &GenerationHandle, outcome: Outcome) {
        let status = conversation.update(|c| -> Option<ResponseStatus> {
            let turn = c.turn_mut(handle.turn_id())?;
            match outcome {
                Outcome::Completed => turn.finish_response(ResponseStatus::Completed),
                Outcome::Cancelled => turn.finish_response(ResponseStatus::Cancelled),
                Outcome::Failed(ref e) => {
                    tracing::warn!("Generation {} failed: {}", handle.id(), e);
                    turn.fail_response(e.user_message());
                }
            }
            let status = turn.status();
            c.touch();
            status
        });

        if status.is_some() {
            self.persist(conversation).await;
        }

        conversation.clear_generation(handle.id());
        handle.mark_finished();

        let status = status.unwrap_or(ResponseStatus::Cancelled);
        tracing::info!(conversation = %conversation.id(), "Generation finished: {:?}", status);
        self.emit(ChatEvent::GenerationFinished {
            conversation_id: conversation.id(),
            turn_id: handle.turn_id(),
            status,
        });
    }
}

/// Stored user content, with any attached context in front of the question
fn compose_user_content(text: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("<context>\n{}\n</context>\n\n{}", context, text),
        None => text.to_string(),
    }
}
