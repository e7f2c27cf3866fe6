//! Persistent channel endpoint.
//!
//! One socket serves many turns. Each inbound frame is validated and
//! streamed back as chunk frames followed by a terminal frame; a rejected
//! frame gets an error frame without closing the socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::StreamExt;

use parley_core::errors::GENERIC_ERROR;
use parley_core::frames::{ClientFrame, ServerFrame};
use parley_core::provider::TokenEvent;

use crate::history;
use crate::routes;
use crate::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("channel client connected");
    while let Some(Ok(msg)) = socket.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                if send_error(&mut socket, "Invalid message format").await.is_err() {
                    return;
                }
                continue;
            }
        };
        if run_turn(&mut socket, &state, frame).await.is_err() {
            return;
        }
    }
    tracing::info!("channel client disconnected");
}

/// Drive one turn to its terminal frame. `Err` means the socket is gone.
async fn run_turn(socket: &mut WebSocket, state: &AppState, frame: ClientFrame) -> Result<(), ()> {
    let message = match routes::validate(&frame.message, &state.filter) {
        Ok(message) => message,
        Err(rejection) => return send_error(socket, rejection.user_message()).await,
    };
    let shaped = history::shape_streaming(&frame.conversation_history);

    let mut tokens = match state.provider.stream(&message, &shaped).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::error!(kind = e.error_kind(), error = %e, "provider stream failed to open");
            return send_error(socket, GENERIC_ERROR).await;
        }
    };

    loop {
        match tokens.next().await {
            Some(TokenEvent::Delta(content)) => {
                send_frame(socket, &ServerFrame::Chunk { content }).await?;
            }
            Some(TokenEvent::Error(error)) => {
                return send_frame(socket, &ServerFrame::Error { error: Some(error) }).await;
            }
            Some(TokenEvent::Done) | None => {
                return send_frame(socket, &ServerFrame::Complete).await;
            }
        }
    }
}

async fn send_error(socket: &mut WebSocket, error: &str) -> Result<(), ()> {
    send_frame(socket, &ServerFrame::Error { error: Some(error.to_string()) }).await
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
