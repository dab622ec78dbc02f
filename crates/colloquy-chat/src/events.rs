//! Chat event types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::turn::ResponseStatus;

/// Events broadcast to the UI while conversations change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A new version began streaming into an assistant turn
    GenerationStarted {
        conversation_id: Uuid,
        turn_id: Uuid,
        response_index: usize,
    },

    /// A fragment was appended to the streaming version
    Fragment {
        conversation_id: Uuid,
        turn_id: Uuid,
        delta: String,
    },

    /// The streaming version reached a terminal status
    GenerationFinished {
        conversation_id: Uuid,
        turn_id: Uuid,
        status: ResponseStatus,
    },

    /// Turns, selection, title or model changed outside of streaming
    ConversationUpdated { conversation_id: Uuid },

    /// A different conversation is now the active one
    ActiveConversationChanged { conversation_id: Uuid },

    ConversationDeleted { conversation_id: Uuid },

    /// Saving failed; in-memory state is still authoritative
    PersistFailed {
        conversation_id: Uuid,
        message: String,
    },
}

impl ChatEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            ChatEvent::GenerationStarted { conversation_id, .. }
            | ChatEvent::Fragment { conversation_id, .. }
            | ChatEvent::GenerationFinished { conversation_id, .. }
            | ChatEvent::ConversationUpdated { conversation_id }
            | ChatEvent::ActiveConversationChanged { conversation_id }
            | ChatEvent::ConversationDeleted { conversation_id }
            | ChatEvent::PersistFailed { conversation_id, .. } => *conversation_id,
        }
    }

    /// Check if this event ends a generation
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::GenerationFinished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let id = Uuid::new_v4();
        let event = ChatEvent::GenerationFinished {
            conversation_id: id,
            turn_id: id,
            status: ResponseStatus::Cancelled,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "generation_finished");
        assert_eq!(json["status"], "cancelled");
        assert!(event.is_terminal());
        assert_eq!(event.conversation_id(), id);
    }
}
