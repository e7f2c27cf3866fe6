use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// Lifecycle of the persistent channel. Owned exclusively by the channel
/// client; the orchestrator only reads it to decide routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Turn-level state of the orchestrator. A new send is accepted only from
/// `Idle`; every turn ends back in `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingState {
    Idle,
    Sending,
    Connecting,
    Streaming,
    Complete,
}

/// Normalized events the orchestrator emits to its consumer, identical for
/// both transports.
#[derive(Clone, Debug)]
pub enum ChatEvent {
    /// Growing accumulation buffer. `is_complete` fires once, immediately
    /// before the final `Message`.
    StreamingUpdate { content: String, is_complete: bool },
    /// The finalized assistant message. At most one per turn.
    Message(ChatMessage),
    /// User-facing error text. At most one terminal event per turn.
    Error(String),
    LoadingState(LoadingState),
}

impl ChatEvent {
    /// Terminal events close a turn; exactly one fires per turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Message(_) | Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(ChatEvent::Message(ChatMessage::assistant("done")).is_terminal());
        assert!(ChatEvent::Error("boom".into()).is_terminal());
        assert!(!ChatEvent::StreamingUpdate { content: "x".into(), is_complete: false }
            .is_terminal());
        assert!(!ChatEvent::LoadingState(LoadingState::Idle).is_terminal());
    }

    #[test]
    fn states_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ConnectionState::Connected).unwrap(), "\"connected\"");
        assert_eq!(serde_json::to_string(&LoadingState::Streaming).unwrap(), "\"streaming\"");
    }
}
