//! Wire types for both transports.
//!
//! The persistent channel exchanges `ClientFrame`/`ServerFrame` as JSON text
//! messages; the HTTP endpoints exchange `ChatRequest` bodies and either a
//! `ChatResponse` (unary) or `data: `-framed `StreamFrame`s (chunked).

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::message::ChatMessage;

/// Client-to-server frame on the persistent channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub action: String,
    pub message: String,
    pub session_id: SessionId,
    pub conversation_history: Vec<ChatMessage>,
    pub timestamp: String,
}

impl ClientFrame {
    pub fn message(
        text: impl Into<String>,
        session_id: SessionId,
        history: Vec<ChatMessage>,
    ) -> Self {
        Self {
            action: "message".into(),
            message: text.into(),
            session_id,
            conversation_history: history,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Server-to-client frame on the persistent channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Chunk {
        content: String,
    },
    Complete,
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerFrame {
    /// Error text for an error frame, with the protocol default when the
    /// server omitted one.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error.as_deref().unwrap_or("Server error")),
            _ => None,
        }
    }
}

/// Request body shared by `/chat` and `/chat/stream`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Successful unary response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: String,
    pub session_id: SessionId,
}

/// Error body returned with a 400/500 status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

/// One event-stream data payload on `/chat/stream`. The `[DONE]` sentinel is
/// framed separately and never parses as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StreamFrame {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "error")]
    Error(String),
}

/// Terminal sentinel on the chunked HTTP path.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Prefix of every data line in the event stream.
pub const DATA_PREFIX: &str = "data: ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_wire_shape() {
        let frame = ClientFrame::message("hi", SessionId::from_raw("chat-1"), vec![]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["action"], "message");
        assert_eq!(json["message"], "hi");
        assert_eq!(json["sessionId"], "chat-1");
        assert!(json["conversationHistory"].as_array().unwrap().is_empty());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn server_frames_parse_by_type_tag() {
        let chunk: ServerFrame =
            serde_json::from_str(r#"{"type":"chunk","content":"Hel"}"#).unwrap();
        assert!(matches!(chunk, ServerFrame::Chunk { ref content } if content == "Hel"));

        let complete: ServerFrame = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert!(matches!(complete, ServerFrame::Complete));

        let error: ServerFrame =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(error.error_text(), Some("boom"));
    }

    #[test]
    fn error_frame_without_text_uses_default() {
        let error: ServerFrame = serde_json::from_str(r#"{"type":"error"}"#).unwrap();
        assert_eq!(error.error_text(), Some("Server error"));
    }

    #[test]
    fn chunk_frame_has_no_error_text() {
        let chunk = ServerFrame::Chunk { content: "x".into() };
        assert!(chunk.error_text().is_none());
    }

    #[test]
    fn chat_request_defaults_missing_fields() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(req.message, "hello");
        assert!(req.conversation_history.is_empty());
        assert!(req.session_id.is_none());
    }

    #[test]
    fn stream_frame_text_shape() {
        let frame = StreamFrame::Text("tok".into());
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"text":"tok"}"#);

        let parsed: StreamFrame = serde_json::from_str(r#"{"error":"Streaming failed"}"#).unwrap();
        assert!(matches!(parsed, StreamFrame::Error(ref e) if e == "Streaming failed"));
    }
}
