use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use parley_core::errors::ChatError;
use parley_core::message::ChatMessage;
use parley_core::provider::{ModelProvider, TokenEvent, TokenStream};

/// Demo backend: echoes the prompt back, word by word on the streaming
/// path so the chunked framing is visible end to end.
pub struct EchoProvider {
    token_delay: Duration,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            token_delay: Duration::from_millis(40),
        }
    }

    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }

    fn response(&self, prompt: &str, history: &[ChatMessage]) -> String {
        format!(
            "You said: \"{prompt}\". That makes {} messages so far in this conversation.",
            history.len() + 1
        )
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, ChatError> {
        Ok(self.response(prompt, history))
    }

    async fn stream(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<TokenStream, ChatError> {
        let text = self.response(prompt, history);
        let delay = self.token_delay;
        let tokens: Vec<TokenEvent> = text
            .split_inclusive(' ')
            .map(|word| TokenEvent::Delta(word.to_string()))
            .chain(std::iter::once(TokenEvent::Done))
            .collect();
        let paced = stream::iter(tokens).then(move |event| async move {
            if matches!(event, TokenEvent::Delta(_)) {
                tokio::time::sleep(delay).await;
            }
            event
        });
        Ok(Box::pin(paced))
    }
}
