//! Conversation persistence

mod json;
mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::conversation::Conversation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable home for conversations.
///
/// `load` returns conversations newest first, with any version that was
/// still streaming at save time already turned into a failure.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn load(&self) -> StoreResult<Vec<Conversation>>;

    /// Insert or replace one conversation
    async fn save(&self, conversation: &Conversation) -> StoreResult<()>;

    async fn save_all(&self, conversations: &[Conversation]) -> StoreResult<()> {
        for conversation in conversations {
            self.save(conversation).await?;
        }
        Ok(())
    }

    /// Remove one conversation. Missing ids are not an error.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    /// Remove every conversation
    async fn clear(&self) -> StoreResult<()>;
}

/// Shared tail of every `load`: repair interrupted turns, newest first.
fn finish_load(mut conversations: Vec<Conversation>) -> Vec<Conversation> {
    for conversation in &mut conversations {
        if conversation.recover_interrupted() {
            tracing::info!(
                "Conversation {} had an interrupted generation; marked as failed",
                conversation.id
            );
        }
    }
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    conversations
}
