//! colloquy-chat: conversations, streaming generation and sessions
//!
//! A conversation is a list of turns; assistant turns keep every version
//! ever generated for them. The [`GenerationController`] streams provider
//! fragments into those versions on background tasks, and the
//! [`SessionManager`] tracks which conversation is active.

pub mod controller;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod render;
pub mod session;
pub mod store;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{GenerationConfig, GenerationController};
pub use conversation::{Conversation, DEFAULT_TITLE, LiveConversation};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use handle::GenerationHandle;
pub use render::{Block, Document, Segment, render};
pub use session::{ConversationSummary, SessionManager};
pub use store::{ConversationStore, JsonFileStore, MemoryStore, StoreError};
pub use turn::{GenerationState, Response, ResponseStatus, Role, Turn};
