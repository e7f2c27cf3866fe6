//! Transport B: chunked HTTP fallback.
//!
//! `POST /chat/stream` returns a `text/event-stream` body. Each data line
//! carries either a JSON token frame, a JSON error frame, or the `[DONE]`
//! sentinel. Byte chunks arrive at arbitrary boundaries, so the adapter
//! buffers partial lines and only parses complete ones. Malformed frames are
//! skipped without disturbing the rest of the stream.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use parley_core::errors::ChatError;
use parley_core::frames::{ChatErrorBody, ChatRequest, StreamFrame, DATA_PREFIX, DONE_SENTINEL};

/// One decoded event from the fallback stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SseEvent {
    Text(String),
    Done,
    Error(String),
}

pub struct SseClient {
    http: reqwest::Client,
    base_url: String,
}

impl SseClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChatError::Transport(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Open a chunked response for one turn. The returned stream ends after
    /// the first terminal event, or yields nothing further once `cancel`
    /// fires.
    pub async fn send(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<SseEventStream, ChatError> {
        let url = format!("{}/chat/stream", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("Request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.json::<ChatErrorBody>().await.ok();
            return Err(match body {
                Some(b) if b.blocked == Some(true) => {
                    ChatError::ContentBlocked { reason: b.reason }
                }
                Some(b) if status.is_client_error() => ChatError::Validation(b.error),
                Some(b) => ChatError::Upstream(b.error),
                None => ChatError::Transport(format!("Unexpected status {status}")),
            });
        }

        let bytes = resp.bytes_stream().map_err(|e| e.to_string());
        Ok(SseEventStream::new(bytes, cancel))
    }

    /// Probe `HEAD /chat/stream` for the streaming-capability header.
    pub async fn supports_streaming(&self) -> bool {
        let url = format!("{}/chat/stream", self.base_url);
        match self.http.head(&url).send().await {
            Ok(resp) => {
                resp.status().is_success()
                    && resp
                        .headers()
                        .get("x-streaming-support")
                        .and_then(|v| v.to_str().ok())
                        == Some("true")
            }
            Err(_) => false,
        }
    }
}

/// Line-framing adapter over the raw byte stream.
pub struct SseEventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    buffer: String,
    pending: VecDeque<SseEvent>,
    done: bool,
}

impl SseEventStream {
    fn new(
        inner: impl Stream<Item = Result<Bytes, String>> + Send + 'static,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            cancelled: Box::pin(cancel.cancelled_owned()),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(line.trim_end_matches(['\n', '\r'])) {
                let terminal = matches!(event, SseEvent::Done | SseEvent::Error(_));
                self.pending.push_back(event);
                if terminal {
                    self.done = true;
                    break;
                }
            }
        }
    }
}

/// Decode one framed line. Blank lines and malformed payloads yield nothing.
fn parse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim();
    let payload = line.strip_prefix(DATA_PREFIX).or_else(|| line.strip_prefix("data:"))?;
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<StreamFrame>(payload) {
        Ok(StreamFrame::Text(text)) => Some(SseEvent::Text(text)),
        Ok(StreamFrame::Error(error)) => Some(SseEvent::Error(error)),
        Err(_) => {
            tracing::debug!(payload = %payload, "skipping malformed stream frame");
            None
        }
    }
}

impl Stream for SseEventStream {
    type Item = SseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SseEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if self.done {
                return Poll::Ready(None);
            }
            if self.cancelled.as_mut().poll(cx).is_ready() {
                self.done = true;
                return Poll::Ready(None);
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    self.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    self.pending
                        .push_back(SseEvent::Error(format!("Stream read failed: {e}")));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
