//! Transport A: persistent channel client.
//!
//! A single driver loop owns the socket: connect, run the session, and on
//! abnormal closure schedule a reconnect with exponential backoff
//! (`base * 2^attempts`, bounded by a configured attempt ceiling; the counter
//! resets on every successful open). A graceful close (code 1000) never
//! reconnects. All delayed work is guarded by a liveness flag and a
//! cancellation token so nothing mutates state after disposal.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use parley_core::frames::{ClientFrame, ServerFrame};
use parley_core::state::ConnectionState;

#[derive(Clone, Debug)]
pub struct WsConfig {
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_base: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_attempts: 3,
            reconnect_base: Duration::from_secs(3),
        }
    }
}

/// Events forwarded to the owner. `Frame` carries every server frame
/// unchanged; final-message assembly stays with the orchestrator.
#[derive(Clone, Debug)]
pub enum WsEvent {
    Connected,
    Disconnected,
    Frame(ServerFrame),
    Error(String),
}

/// Delay before reconnect attempt `attempts + 1`.
fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base * 2u32.saturating_pow(attempts)
}

struct Shared {
    config: WsConfig,
    state: RwLock<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: mpsc::UnboundedSender<WsEvent>,
    alive: AtomicBool,
    running: AtomicBool,
    chunks: AtomicU32,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: WsEvent) {
        if self.alive.load(Ordering::Relaxed) {
            let _ = self.events.send(event);
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => {
                if matches!(frame, ServerFrame::Chunk { .. }) {
                    self.chunks.fetch_add(1, Ordering::Relaxed);
                }
                self.emit(WsEvent::Frame(frame));
            }
            Err(_) => self.emit(WsEvent::Error("Failed to parse server frame".into())),
        }
    }
}

#[derive(Clone)]
pub struct WsClient {
    shared: Arc<Shared>,
    shutdown: Arc<Mutex<CancellationToken>>,
}

impl WsClient {
    pub fn new(config: WsConfig) -> (Self, mpsc::UnboundedReceiver<WsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                outbound: Mutex::new(None),
                events: tx,
                alive: AtomicBool::new(true),
                running: AtomicBool::new(false),
                chunks: AtomicU32::new(0),
            }),
            shutdown: Arc::new(Mutex::new(CancellationToken::new())),
        };
        (client, rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Chunks received on the current connection.
    pub fn chunk_count(&self) -> u32 {
        self.shared.chunks.load(Ordering::Relaxed)
    }

    /// Start the driver loop. No-op when already open, opening, or disposed.
    pub fn connect(&self) {
        if !self.shared.alive.load(Ordering::Relaxed) {
            return;
        }
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let token = self.shutdown.lock().clone();
        tokio::spawn(run_loop(shared, token));
    }

    /// Cancel any pending reconnect, close with a normal-closure code, and
    /// reset to `Disconnected`. `connect()` may be called again afterwards.
    pub fn disconnect(&self) {
        let token = {
            let mut guard = self.shutdown.lock();
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        token.cancel();
        self.shared.outbound.lock().take();
        self.shared.chunks.store(0, Ordering::Relaxed);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Enqueue a frame for delivery. Never panics: returns `false` and
    /// reports through the event channel when the channel is not open, so
    /// callers can fall back synchronously.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        if self.state() != ConnectionState::Connected {
            self.shared.emit(WsEvent::Error("Channel not connected".into()));
            return false;
        }
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                self.shared
                    .emit(WsEvent::Error(format!("Failed to encode frame: {e}")));
                return false;
            }
        };
        let sent = match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.emit(WsEvent::Error("Channel not connected".into()));
        }
        sent
    }

    /// Terminal teardown: after this no handler may mutate state and no
    /// reconnect will fire.
    pub fn dispose(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shutdown.lock().cancel();
        self.shared.outbound.lock().take();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

enum SessionEnd {
    Graceful,
    Abnormal(String),
}

async fn run_loop(shared: Arc<Shared>, token: CancellationToken) {
    let mut attempts: u32 = 0;
    loop {
        if token.is_cancelled() || !shared.alive.load(Ordering::Relaxed) {
            break;
        }
        shared.set_state(ConnectionState::Connecting);

        match connect_async(shared.config.url.as_str()).await {
            Ok((ws, _resp)) => {
                attempts = 0;
                shared.chunks.store(0, Ordering::Relaxed);
                shared.set_state(ConnectionState::Connected);
                shared.emit(WsEvent::Connected);
                tracing::debug!(url = %shared.config.url, "channel connected");

                let end = run_session(&shared, ws, &token).await;
                shared.outbound.lock().take();
                if !shared.alive.load(Ordering::Relaxed) {
                    break;
                }
                shared.set_state(ConnectionState::Disconnected);
                match end {
                    SessionEnd::Graceful => {
                        shared.emit(WsEvent::Disconnected);
                        break;
                    }
                    SessionEnd::Abnormal(detail) => {
                        tracing::warn!(detail = %detail, "channel closed abnormally");
                        shared.emit(WsEvent::Error(detail));
                        shared.emit(WsEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                shared.set_state(ConnectionState::Error);
                shared.emit(WsEvent::Error(format!("Channel open failed: {e}")));
            }
        }

        if attempts >= shared.config.reconnect_attempts {
            tracing::warn!(
                attempts = attempts,
                "reconnect ceiling reached, giving up"
            );
            break;
        }
        let delay = backoff_delay(shared.config.reconnect_base, attempts);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        attempts += 1;
    }
    shared.running.store(false, Ordering::SeqCst);
}

async fn run_session(
    shared: &Arc<Shared>,
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    token: &CancellationToken,
) -> SessionEnd {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound.lock() = Some(tx);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = ws
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    })))
                    .await;
                return SessionEnd::Graceful;
            }
            out = rx.recv() => match out {
                Some(text) => {
                    if let Err(e) = ws.send(Message::Text(text.into())).await {
                        return SessionEnd::Abnormal(format!("Send failed: {e}"));
                    }
                }
                None => return SessionEnd::Abnormal("Outbound channel dropped".into()),
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) if f.code == CloseCode::Normal => SessionEnd::Graceful,
                        Some(f) => SessionEnd::Abnormal(close_diagnostic(&f)),
                        None => SessionEnd::Abnormal(
                            "Channel closed without close frame".into(),
                        ),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Abnormal(format!("Channel error: {e}")),
                None => return SessionEnd::Abnormal("Channel closed unexpectedly".into()),
            },
        }
    }
}

fn close_diagnostic(frame: &CloseFrame) -> String {
    if frame.code == CloseCode::Abnormal {
        "Channel connection failed: server rejected connection".into()
    } else if frame.reason.is_empty() {
        format!("Channel closed with code {}", u16::from(frame.code))
    } else {
        frame.reason.to_string()
    }
}
