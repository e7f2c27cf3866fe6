use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ChatError;
use crate::message::ChatMessage;

/// One item of an upstream token stream. `Done` is the explicit end marker;
/// a stream that ends without one was interrupted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenEvent {
    Delta(String),
    Done,
    Error(String),
}

pub type TokenStream = Pin<Box<dyn Stream<Item = TokenEvent> + Send>>;

/// The hosted model endpoint, consumed as a black box: given a prompt and an
/// already-shaped history it returns either the whole text or a token stream
/// terminated by `TokenEvent::Done`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, ChatError>;

    async fn stream(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<TokenStream, ChatError>;
}

impl TokenEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
