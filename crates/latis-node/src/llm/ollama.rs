//! Ollama provider (OpenAI-compatible chat API)

use super::{ChatMessage, Provider, ProviderError, StreamChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for the Ollama provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: String,
    /// Model name (e.g. "llama3.2")
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
        }
    }
}

/// Talks to Ollama via its OpenAI-compatible chat-completions API
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider from its configuration
    pub fn new(config: OllamaConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            model: config.model,
            client: reqwest::Client::new(),
        }
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
        }
    }

    async fn post(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.request_body(messages, stream))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "ollama API error");
            return Err(ProviderError::Rejected(format!("status {status}: {body}")));
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: String,
}

/// Outcome of parsing one server-sent-event line
#[derive(Debug, PartialEq)]
enum StreamLine {
    /// Not a data line, or undecodable; keep reading
    Skip,
    /// End-of-stream marker
    Done,
    /// A content delta; `finished` when the model reported a stop
    Delta { content: String, finished: bool },
}

fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return StreamLine::Done;
    }

    let parsed: StreamResponse = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "undecodable stream chunk");
            return StreamLine::Skip;
        }
    };

    match parsed.choices.into_iter().next() {
        Some(choice) => StreamLine::Delta {
            content: choice.delta.content,
            finished: choice.finish_reason.as_deref() == Some("stop"),
        },
        None => StreamLine::Skip,
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        debug!(model = %self.model, message_count = messages.len(), "ollama complete request");

        let response = self.post(messages, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(format!("decode response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::Rejected(error.message));
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Rejected("no choices in response".to_string()))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        debug!(model = %self.model, message_count = messages.len(), "ollama stream request");

        let mut response = self.post(messages, true).await?;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut buffer = Vec::new();
            loop {
                let chunk = match response.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Unavailable(e.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_stream_line(&line) {
                        StreamLine::Skip => {}
                        StreamLine::Done => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: String::new(),
                                    done: true,
                                }))
                                .await;
                            return;
                        }
                        StreamLine::Delta { content, finished } => {
                            if !content.is_empty()
                                && tx
                                    .send(Ok(StreamChunk {
                                        content,
                                        done: false,
                                    }))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                            if finished {
                                let _ = tx
                                    .send(Ok(StreamChunk {
                                        content: String::new(),
                                        done: true,
                                    }))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }

            // Stream ended without an explicit done signal.
            let _ = tx
                .send(Ok(StreamChunk {
                    content: String::new(),
                    done: true,
                }))
                .await;
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
