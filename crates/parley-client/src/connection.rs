//! Turn orchestrator over both transports.
//!
//! One actor task owns the turn state machine. A turn is routed over the
//! persistent channel when it is actually connected, otherwise over chunked
//! HTTP. The fallback is invisible to the consumer: the same normalized
//! `ChatEvent` sequence comes out either way, and a turn that loses its
//! channel mid-stream is replayed over HTTP with the partial buffer
//! discarded. Exactly one terminal event fires per turn; a stopped turn
//! fires none.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::errors::ChatError;
use parley_core::frames::{ChatRequest, ClientFrame, ServerFrame};
use parley_core::ids::SessionId;
use parley_core::message::ChatMessage;
use parley_core::state::{ChatEvent, ConnectionState, LoadingState};

use crate::sse::{SseClient, SseEvent};
use crate::ws::{WsClient, WsConfig, WsEvent};

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Channel endpoint. `None` pins every turn to the HTTP fallback.
    pub ws_url: Option<String>,
    pub http_base: String,
    pub reconnect_attempts: u32,
    pub reconnect_base: Duration,
}

impl ConnectionConfig {
    pub fn new(http_base: impl Into<String>) -> Self {
        Self {
            ws_url: None,
            http_base: http_base.into(),
            reconnect_attempts: 3,
            reconnect_base: Duration::from_secs(3),
        }
    }

    pub fn with_channel(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }
}

enum Command {
    Send { text: String, history: Vec<ChatMessage> },
    Stop,
    Shutdown,
}

/// Cheap handle to a running connection actor.
#[derive(Clone)]
pub struct ChatHandle {
    cmd: mpsc::UnboundedSender<Command>,
    session_id: SessionId,
    ws: Option<WsClient>,
}

impl ChatHandle {
    pub fn send_message(&self, text: impl Into<String>, history: Vec<ChatMessage>) {
        let _ = self.cmd.send(Command::Send { text: text.into(), history });
    }

    /// Abandon the in-flight turn. No terminal event is emitted for it.
    pub fn stop_message(&self) {
        let _ = self.cmd.send(Command::Stop);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd.send(Command::Shutdown);
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ws
            .as_ref()
            .map_or(ConnectionState::Disconnected, WsClient::state)
    }

    pub fn transport_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

pub struct ChatConnection;

impl ChatConnection {
    /// Spawn the actor. When a channel endpoint is configured the client
    /// starts connecting immediately; sends issued before it opens simply
    /// take the HTTP path.
    pub fn spawn(
        config: ConnectionConfig,
    ) -> Result<(ChatHandle, mpsc::UnboundedReceiver<ChatEvent>), ChatError> {
        let session_id = SessionId::new();
        let sse = SseClient::new(config.http_base.clone())?;

        let (ws, ws_rx) = match &config.ws_url {
            Some(url) => {
                let (client, rx) = WsClient::new(WsConfig {
                    url: url.clone(),
                    reconnect_attempts: config.reconnect_attempts,
                    reconnect_base: config.reconnect_base,
                });
                client.connect();
                (Some(client), Some(rx))
            }
            None => (None, None),
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            session_id: session_id.clone(),
            events: event_tx,
            sse,
            ws: ws.clone(),
            loading: LoadingState::Idle,
            turn: None,
        };
        tokio::spawn(actor.run(cmd_rx, ws_rx));

        Ok((ChatHandle { cmd: cmd_tx, session_id, ws }, event_rx))
    }
}

struct ActiveTurn {
    prompt: String,
    history: Vec<ChatMessage>,
    via_channel: bool,
    buffer: String,
}

enum Flow {
    Continue,
    Shutdown,
}

enum Input {
    Command(Option<Command>),
    Channel(Option<WsEvent>),
}

struct Actor {
    session_id: SessionId,
    events: mpsc::UnboundedSender<ChatEvent>,
    sse: SseClient,
    ws: Option<WsClient>,
    loading: LoadingState,
    turn: Option<ActiveTurn>,
}

impl Actor {
    async fn run(
        mut self,
        mut cmds: mpsc::UnboundedReceiver<Command>,
        mut ws_rx: Option<mpsc::UnboundedReceiver<WsEvent>>,
    ) {
        loop {
            let input = match ws_rx.as_mut() {
                Some(rx) => tokio::select! {
                    cmd = cmds.recv() => Input::Command(cmd),
                    event = rx.recv() => Input::Channel(event),
                },
                None => Input::Command(cmds.recv().await),
            };
            match input {
                Input::Command(None) | Input::Command(Some(Command::Shutdown)) => break,
                Input::Command(Some(Command::Send { text, history })) => {
                    if let Flow::Shutdown = self.handle_send(text, history, &mut cmds).await {
                        break;
                    }
                }
                Input::Command(Some(Command::Stop)) => {
                    // Only reachable while a channel turn is in flight; the
                    // HTTP turn handles Stop inside its own loop.
                    if self.turn.is_some() {
                        self.cancel_turn();
                    }
                }
                Input::Channel(None) => ws_rx = None,
                Input::Channel(Some(event)) => {
                    if let Flow::Shutdown = self.handle_channel_event(event, &mut cmds).await {
                        break;
                    }
                }
            }
        }
        if let Some(ws) = &self.ws {
            ws.dispose();
        }
    }

    async fn handle_send(
        &mut self,
        text: String,
        history: Vec<ChatMessage>,
        cmds: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Flow {
        if self.loading != LoadingState::Idle || self.turn.is_some() {
            tracing::debug!("send ignored, turn already in flight");
            return Flow::Continue;
        }
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() {
            self.emit(ChatEvent::Error(ChatError::empty_message().user_message()));
            return Flow::Continue;
        }
        if trimmed.chars().count() > MAX_MESSAGE_CHARS {
            self.emit(ChatEvent::Error(ChatError::message_too_long().user_message()));
            return Flow::Continue;
        }

        self.set_loading(LoadingState::Sending);
        self.turn = Some(ActiveTurn {
            prompt: trimmed.clone(),
            history: history.clone(),
            via_channel: false,
            buffer: String::new(),
        });

        if let Some(ws) = &self.ws {
            if ws.is_connected() {
                let frame = ClientFrame::message(trimmed, self.session_id.clone(), history);
                if ws.send(&frame) {
                    if let Some(turn) = self.turn.as_mut() {
                        turn.via_channel = true;
                    }
                    return Flow::Continue;
                }
                tracing::debug!("channel send failed, falling back to chunked HTTP");
            }
        }
        self.run_http_turn(cmds).await
    }

    /// Drive one turn over the HTTP fallback to its end. Also used to replay
    /// a channel turn whose connection dropped mid-stream; the partial buffer
    /// is discarded so the replayed stream starts clean.
    async fn run_http_turn(&mut self, cmds: &mut mpsc::UnboundedReceiver<Command>) -> Flow {
        let request = match self.turn.as_mut() {
            Some(turn) => {
                turn.via_channel = false;
                turn.buffer.clear();
                ChatRequest {
                    message: turn.prompt.clone(),
                    conversation_history: turn.history.clone(),
                    session_id: Some(self.session_id.clone()),
                }
            }
            None => return Flow::Continue,
        };

        let cancel = CancellationToken::new();
        let mut stream = match self.sse.send(&request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(e);
                return Flow::Continue;
            }
        };

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(SseEvent::Text(token)) => self.append_token(&token),
                    Some(SseEvent::Done) => {
                        self.finish();
                        return Flow::Continue;
                    }
                    Some(SseEvent::Error(text)) => {
                        self.fail_with("upstream", text);
                        return Flow::Continue;
                    }
                    None => {
                        self.fail(ChatError::Transport("Stream ended before completion".into()));
                        return Flow::Continue;
                    }
                },
                cmd = cmds.recv() => match cmd {
                    Some(Command::Stop) => {
                        cancel.cancel();
                        self.cancel_turn();
                        return Flow::Continue;
                    }
                    Some(Command::Send { .. }) => {
                        tracing::debug!("send ignored, turn already in flight");
                    }
                    Some(Command::Shutdown) | None => {
                        cancel.cancel();
                        return Flow::Shutdown;
                    }
                },
            }
        }
    }

    async fn handle_channel_event(
        &mut self,
        event: WsEvent,
        cmds: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Flow {
        let channel_turn = matches!(&self.turn, Some(t) if t.via_channel);
        match event {
            WsEvent::Frame(frame) => {
                // Frames arriving after a turn closed or stopped are stale.
                if !channel_turn {
                    return Flow::Continue;
                }
                match frame {
                    ServerFrame::Chunk { content } => self.append_token(&content),
                    ServerFrame::Complete => self.finish(),
                    ServerFrame::Error { .. } => {
                        let text = frame.error_text().unwrap_or("Server error").to_string();
                        self.fail_with("upstream", text);
                    }
                }
            }
            WsEvent::Disconnected if channel_turn => {
                tracing::info!("channel lost mid-turn, replaying over chunked HTTP");
                return self.run_http_turn(cmds).await;
            }
            WsEvent::Error(detail) => {
                // Channel-level noise never surfaces to the consumer; the
                // fallback keeps failures invisible.
                tracing::debug!(detail = %detail, "channel error");
            }
            WsEvent::Connected | WsEvent::Disconnected => {}
        }
        Flow::Continue
    }

    fn append_token(&mut self, token: &str) {
        if self.loading != LoadingState::Streaming {
            self.set_loading(LoadingState::Streaming);
        }
        let content = match self.turn.as_mut() {
            Some(turn) => {
                turn.buffer.push_str(token);
                turn.buffer.clone()
            }
            None => return,
        };
        self.emit(ChatEvent::StreamingUpdate { content, is_complete: false });
    }

    fn finish(&mut self) {
        let Some(turn) = self.turn.take() else { return };
        self.emit(ChatEvent::StreamingUpdate {
            content: turn.buffer.clone(),
            is_complete: true,
        });
        self.set_loading(LoadingState::Complete);
        self.emit(ChatEvent::Message(ChatMessage::assistant(turn.buffer)));
        self.set_loading(LoadingState::Idle);
    }

    fn fail(&mut self, err: ChatError) {
        self.fail_with(err.error_kind(), err.user_message());
    }

    fn fail_with(&mut self, kind: &str, text: String) {
        if self.turn.take().is_none() {
            return;
        }
        tracing::warn!(kind = kind, "turn failed");
        self.emit(ChatEvent::Error(text));
        self.set_loading(LoadingState::Idle);
    }

    fn cancel_turn(&mut self) {
        self.turn = None;
        self.set_loading(LoadingState::Idle);
    }

    fn set_loading(&mut self, state: LoadingState) {
        if self.loading != state {
            self.loading = state;
            self.emit(ChatEvent::LoadingState(state));
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}
