//! Echo provider

use super::{ChatMessage, ChatRole, Provider, ProviderError, StreamChunk};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Echoes the last user message; used for tests and development
#[derive(Debug, Default)]
pub struct EchoProvider;

impl EchoProvider {
    /// Create a new echo provider
    pub fn new() -> Self {
        Self
    }
}

fn last_user_content(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl Provider for EchoProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        Ok(last_user_content(messages))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let (tx, rx) = mpsc::channel(1);
        let content = last_user_content(messages);
        tokio::spawn(async move {
            let _ = tx.send(Ok(StreamChunk { content, done: true })).await;
        });
        Ok(rx)
    }

    fn name(&self) -> &str {
        "echo"
    }
}
