//! Pluggable LLM providers
//!
//! The node treats response generation as a black box behind the
//! [`Provider`] trait. The echo provider is the default and is what
//! the tests exercise; the Ollama provider talks to a local model
//! server over its OpenAI-compatible API.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

mod echo;
mod ollama;

pub use echo::EchoProvider;
pub use ollama::{OllamaConfig, OllamaProvider};

/// LLM back-end failure
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The back-end rejected the request
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The back-end could not be reached
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    /// System instruction
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
}

impl ChatRole {
    /// Wire name used by chat APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A conversation message handed to a provider
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Author role
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One chunk of a streaming response
///
/// The sequence is finite: it terminates after the first chunk with
/// `done` set, or after the first error item.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Text chunk; may be empty on the final chunk
    pub content: String,
    /// True on the last chunk of the response
    pub done: bool,
}

/// Generates LLM completions
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate a response for the given messages (non-streaming)
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;

    /// Generate a streaming response
    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>;

    /// Provider identifier (e.g. "echo", "ollama")
    fn name(&self) -> &str;
}
