//! Scripted provider and helpers shared by the crate's tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_ai::stream::from_fragments;
use colloquy_ai::{ChatMessage, ChatProvider, FragmentStream, ModelInfo, ModelRef, ProviderGateway};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::controller::{GenerationConfig, GenerationController};
use crate::conversation::Conversation;
use crate::events::ChatEvent;
use crate::store::{ConversationStore, MemoryStore, StoreError, StoreResult};
use crate::turn::ResponseStatus;

pub(crate) type FragmentSender = mpsc::UnboundedSender<colloquy_ai::Result<String>>;

/// What the provider does for one `send_chat` call
pub(crate) enum Reply {
    Fragments(Vec<String>),
    FailOnOpen(colloquy_ai::Error),
    FailAfter(Vec<&'static str>, colloquy_ai::Error),
    /// Fragments are fed by the test; the stream ends when the sender drops
    Channel(mpsc::UnboundedReceiver<colloquy_ai::Result<String>>),
}

impl Reply {
    pub(crate) fn fragments(fragments: &[&str]) -> Self {
        Reply::Fragments(fragments.iter().map(|s| s.to_string()).collect())
    }
}

/// Answers calls from a queue of replies and records every request.
/// An empty queue answers "ok".
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    /// Queue a channel-backed reply and hand back its sender
    pub(crate) fn channel(&self) -> FragmentSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Reply::Channel(rx));
        tx
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn list_models(&self) -> colloquy_ai::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "test-model".into(),
            provider_id: "scripted".into(),
            owned_by: None,
        }])
    }

    async fn send_chat(
        &self,
        _model_id: &str,
        messages: &[ChatMessage],
    ) -> colloquy_ai::Result<FragmentStream> {
        self.requests.lock().push(messages.to_vec());
        let reply = self.replies.lock().pop_front();

        match reply {
            None => Ok(from_fragments(["ok"])),
            Some(Reply::Fragments(fragments)) => Ok(from_fragments(fragments)),
            Some(Reply::FailOnOpen(e)) => Err(e),
            Some(Reply::FailAfter(fragments, e)) => {
                let mut items: Vec<colloquy_ai::Result<String>> =
                    fragments.into_iter().map(|f| Ok(f.to_string())).collect();
                items.push(Err(e));
                Ok(Box::pin(tokio_stream::iter(items)))
            }
            Some(Reply::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
        }
    }
}

/// A store whose writes always fail
pub(crate) struct FailingStore;

#[async_trait]
impl ConversationStore for FailingStore {
    async fn load(&self) -> StoreResult<Vec<Conversation>> {
        Ok(Vec::new())
    }

    async fn save(&self, _conversation: &Conversation) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn delete(&self, _id: Uuid) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn clear(&self) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }
}

/// In-memory store whose saves take a while, to widen the window
/// between an operation starting and its first save completing
pub(crate) struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<Conversation> {
        self.inner.get(id)
    }
}

#[async_trait]
impl ConversationStore for SlowStore {
    async fn load(&self) -> StoreResult<Vec<Conversation>> {
        self.inner.load().await
    }

    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(conversation).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete(id).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }
}

pub(crate) fn scripted_model() -> ModelRef {
    ModelRef::new("scripted", "test-model")
}

pub(crate) fn controller_with(
    provider: &Arc<ScriptedProvider>,
    config: GenerationConfig,
) -> (GenerationController, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with_store(provider, store.clone(), config);
    (controller, store)
}

pub(crate) fn controller_with_store(
    provider: &Arc<ScriptedProvider>,
    store: Arc<dyn ConversationStore>,
    config: GenerationConfig,
) -> GenerationController {
    let gateway = ProviderGateway::new().with_provider(provider.clone());
    GenerationController::new(gateway, store, config)
}

async fn next_event(events: &mut broadcast::Receiver<ChatEvent>) -> ChatEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip ahead to the next fragment and return its text
pub(crate) async fn next_fragment(events: &mut broadcast::Receiver<ChatEvent>) -> String {
    loop {
        if let ChatEvent::Fragment { delta, .. } = next_event(events).await {
            return delta;
        }
    }
}

/// Skip ahead to the next terminal event and return its status
pub(crate) async fn wait_finished(events: &mut broadcast::Receiver<ChatEvent>) -> ResponseStatus {
    loop {
        if let ChatEvent::GenerationFinished { status, .. } = next_event(events).await {
            return status;
        }
    }
}
