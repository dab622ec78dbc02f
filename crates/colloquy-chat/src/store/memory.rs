use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{ConversationStore, StoreResult, finish_load};
use crate::conversation::Conversation;

/// Process-local store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored copy of one conversation
    pub fn get(&self, id: Uuid) -> Option<Conversation> {
        self.conversations.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.lock().is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self) -> StoreResult<Vec<Conversation>> {
        let conversations = self.conversations.lock().values().cloned().collect();
        Ok(finish_load(conversations))
    }

    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        self.conversations
            .lock()
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.conversations.lock().remove(&id);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.conversations.lock().clear();
        Ok(())
    }
}
