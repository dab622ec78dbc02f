//! colloquy-ai: uniform gateway over streaming chat providers
//!
//! Every backend, whether a local daemon or a hosted API, is reduced to the
//! same two capabilities: listing models and turning a message list into an
//! ordered, cancellable stream of text fragments.

pub mod error;
pub mod gateway;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use gateway::ProviderGateway;
pub use providers::ChatProvider;
pub use stream::FragmentStream;
pub use types::*;
