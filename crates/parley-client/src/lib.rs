//! Client half of the dual-transport chat delivery layer.
//!
//! Two transports, one consumer-facing contract: [`ws::WsClient`] is the
//! persistent channel (primary), [`sse::SseClient`] is the chunked HTTP
//! fallback, and [`connection::ChatConnection`] owns the per-turn state
//! machine that decides between them, reassembles streamed tokens, and
//! guarantees exactly one terminal event per turn.

pub mod connection;
pub mod sse;
pub mod ws;

pub use connection::{ChatConnection, ChatHandle, ConnectionConfig};
pub use sse::{SseClient, SseEvent};
pub use ws::{WsClient, WsConfig, WsEvent};
