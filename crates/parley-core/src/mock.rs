use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use crate::errors::ChatError;
use crate::message::ChatMessage;
use crate::provider::{ModelProvider, TokenEvent, TokenStream};

/// Pre-programmed responses for deterministic testing without a hosted model.
pub enum MockResponse {
    /// Yield a sequence of token events.
    Stream(Vec<TokenEvent>),
    /// Return a whole text from `invoke` / a one-delta stream from `stream`.
    Text(String),
    /// Return an error from the call itself.
    Error(ChatError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: stream `chunks` as deltas followed by `Done`.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        let mut events: Vec<TokenEvent> =
            chunks.iter().map(|c| TokenEvent::Delta((*c).into())).collect();
        events.push(TokenEvent::Done);
        Self::Stream(events)
    }

    /// Convenience: a stream that fails mid-way after `chunks`.
    pub fn stream_then_error(chunks: &[&str], error: &str) -> Self {
        let mut events: Vec<TokenEvent> =
            chunks.iter().map(|c| TokenEvent::Delta((*c).into())).collect();
        events.push(TokenEvent::Error(error.into()));
        Self::Stream(events)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// counts how often it was called, so tests can assert "no upstream call
/// was made".
pub struct MockProvider {
    responses: Mutex<Vec<Option<MockResponse>>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Some).collect()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    fn next_response(&self) -> Result<MockResponse, ChatError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .get_mut(idx)
            .and_then(Option::take)
            .ok_or_else(|| {
                ChatError::Upstream(format!("MockProvider: no response configured for call {idx}"))
            })
    }
}

async fn resolve(mut response: MockResponse) -> Result<MockResponse, ChatError> {
    while let MockResponse::Delay(delay, inner) = response {
        tokio::time::sleep(delay).await;
        response = *inner;
    }
    Ok(response)
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, _prompt: &str, _history: &[ChatMessage]) -> Result<String, ChatError> {
        match resolve(self.next_response()?).await? {
            MockResponse::Text(text) => Ok(text),
            MockResponse::Stream(events) => {
                // Concatenate deltas; a mid-stream error fails the whole call.
                let mut out = String::new();
                for event in events {
                    match event {
                        TokenEvent::Delta(d) => out.push_str(&d),
                        TokenEvent::Done => return Ok(out),
                        TokenEvent::Error(e) => return Err(ChatError::Upstream(e)),
                    }
                }
                Ok(out)
            }
            MockResponse::Error(e) => Err(e),
            MockResponse::Delay(..) => unreachable!("resolved above"),
        }
    }

    async fn stream(
        &self,
        _prompt: &str,
        _history: &[ChatMessage],
    ) -> Result<TokenStream, ChatError> {
        match resolve(self.next_response()?).await? {
            MockResponse::Stream(events) => Ok(Box::pin(stream::iter(events))),
            MockResponse::Text(text) => Ok(Box::pin(stream::iter(vec![
                TokenEvent::Delta(text),
                TokenEvent::Done,
            ]))),
            MockResponse::Error(e) => Err(e),
            MockResponse::Delay(..) => unreachable!("resolved above"),
        }
    }
}
