//! Conversation-history shaping before provider invocation.
//!
//! The unary path passes the most recent exchanges through verbatim. The
//! streaming paths additionally collapse consecutive same-role messages and
//! patch a user-terminated history with an assistant acknowledgement, since
//! streaming backends expect strict role alternation.

use parley_core::message::{ChatMessage, Role};

/// Acknowledgement appended when the shaped history ends on a user turn.
pub const ALTERNATION_ACK: &str = "I understand. Let me help you with that.";

const UNARY_WINDOW: usize = 5;
const STREAMING_WINDOW: usize = 10;

fn last_n(history: &[ChatMessage], n: usize) -> &[ChatMessage] {
    &history[history.len().saturating_sub(n)..]
}

/// History for `/chat`: the last five messages, unchanged.
pub fn shape_unary(history: &[ChatMessage]) -> Vec<ChatMessage> {
    last_n(history, UNARY_WINDOW).to_vec()
}

/// History for the streaming paths: the last ten messages with same-role
/// runs collapsed to their first message, plus the alternation ack when the
/// history still ends with the user speaking.
pub fn shape_streaming(history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut shaped: Vec<ChatMessage> = Vec::new();
    for msg in last_n(history, STREAMING_WINDOW) {
        match shaped.last() {
            Some(prev) if prev.role == msg.role => {}
            _ => shaped.push(msg.clone()),
        }
    }
    if shaped.last().map(|m| m.role) == Some(Role::User) {
        shaped.push(ChatMessage::assistant(ALTERNATION_ACK));
    }
    shaped
}
