use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the conversation log. Field names match the wire format
/// shared by both transports, so this type serializes directly into
/// `conversationHistory` payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Some(MessageId::new()),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            is_streaming: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Some(MessageId::new()),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            is_streaming: Some(false),
        }
    }

    /// Empty assistant message used as the in-place streaming placeholder.
    /// Only one of these may exist in a conversation at a time.
    pub fn streaming_placeholder() -> Self {
        Self {
            id: Some(MessageId::new()),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now().to_rfc3339(),
            is_streaming: Some(true),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.unwrap_or(false)
    }
}
