//! Agent surface: message execution against the LLM provider

use crate::llm::{ChatMessage, Provider};
use crate::state::State;
use bytes::Bytes;
use latis_proto::rpc::ConnectionHandler;
use latis_proto::{
    AgentCard, AgentEvent, AgentMessage, AgentRequest, ErrorCode, ErrorDetails, Frame, FrameCodec,
    ProtocolError, TaskState,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Queue of events produced while executing one agent request
pub type EventQueue = mpsc::Sender<AgentEvent>;

/// Adapts the LLM provider into the Agent RPC surface
pub struct AgentExecutor {
    provider: Arc<dyn Provider>,
    streaming: bool,
}

impl AgentExecutor {
    /// Create an executor
    pub fn new(provider: Arc<dyn Provider>, streaming: bool) -> Self {
        Self {
            provider,
            streaming,
        }
    }

    /// Execute one inbound message, writing events to the queue
    ///
    /// Streaming configuration decides whether the reply is a single
    /// message or a sequence of status updates ending in a final one.
    pub async fn execute(&self, id: Uuid, message: &AgentMessage, queue: &EventQueue) {
        if self.streaming {
            self.execute_streaming(id, message, queue).await
        } else {
            self.execute_unary(id, message, queue).await
        }
    }

    /// Execute with a single reply message regardless of configuration
    pub async fn execute_unary(&self, id: Uuid, message: &AgentMessage, queue: &EventQueue) {
        let history = history_of(message);

        match self.provider.complete(&history).await {
            Ok(text) => {
                let _ = queue
                    .send(AgentEvent::Message {
                        id,
                        message: AgentMessage::agent_text(text),
                    })
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "provider failed");
                let _ = queue.send(failed_event(id, e.to_string())).await;
            }
        }
    }

    async fn execute_streaming(&self, id: Uuid, message: &AgentMessage, queue: &EventQueue) {
        let history = history_of(message);

        let mut chunks = match self.provider.stream(&history).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "provider failed to start stream");
                let _ = queue.send(failed_event(id, e.to_string())).await;
                return;
            }
        };

        let mut full_response = String::new();
        while let Some(item) = chunks.recv().await {
            match item {
                Ok(chunk) => {
                    if !chunk.content.is_empty() {
                        full_response.push_str(&chunk.content);
                        let _ = queue
                            .send(AgentEvent::StatusUpdate {
                                id,
                                state: TaskState::Working,
                                message: Some(AgentMessage::agent_text(chunk.content)),
                                is_final: false,
                            })
                            .await;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "provider stream failed");
                    let _ = queue.send(failed_event(id, e.to_string())).await;
                    return;
                }
            }
        }

        let _ = queue
            .send(AgentEvent::StatusUpdate {
                id,
                state: TaskState::Completed,
                message: Some(AgentMessage::agent_text(full_response)),
                is_final: true,
            })
            .await;
    }

    /// Acknowledge a cancellation with a final CANCELED event
    pub async fn cancel(&self, id: Uuid, queue: &EventQueue) {
        let _ = queue
            .send(AgentEvent::StatusUpdate {
                id,
                state: TaskState::Canceled,
                message: None,
                is_final: true,
            })
            .await;
    }
}

fn history_of(message: &AgentMessage) -> Vec<ChatMessage> {
    let content = message.first_text().unwrap_or_default();
    vec![ChatMessage::user(content)]
}

fn failed_event(id: Uuid, detail: String) -> AgentEvent {
    AgentEvent::StatusUpdate {
        id,
        state: TaskState::Failed,
        message: Some(AgentMessage::agent_text(detail)),
        is_final: true,
    }
}

/// Serves agent connections, forwarding executor events as frames
pub struct AgentConnHandler {
    executor: AgentExecutor,
    card: AgentCard,
    state: Arc<State>,
}

impl AgentConnHandler {
    /// Create a handler
    pub fn new(executor: AgentExecutor, card: AgentCard, state: Arc<State>) -> Self {
        Self {
            executor,
            card,
            state,
        }
    }
}

/// A `Message` or `Card` event terminates its reply; status updates
/// terminate only when flagged final.
fn is_final_event(event: &AgentEvent) -> bool {
    match event {
        AgentEvent::Message { .. } | AgentEvent::Card { .. } => true,
        AgentEvent::StatusUpdate { is_final, .. } => *is_final,
    }
}

async fn forward_events<C>(
    codec: &mut FrameCodec,
    conn: &mut C,
    mut events: mpsc::Receiver<AgentEvent>,
    sequence: &mut u32,
) -> Result<(), ProtocolError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Some(event) = events.recv().await {
        let payload =
            rmp_serde::to_vec(&event).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let seq = *sequence;
        *sequence = sequence.wrapping_add(1);
        let frame = if is_final_event(&event) {
            Frame::last(seq, Bytes::from(payload))
        } else {
            Frame::data(seq, Bytes::from(payload))
        };
        codec.write_frame(conn, &frame).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl<C> ConnectionHandler<C> for AgentConnHandler
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn serve_connection(&self, mut conn: C) -> Result<(), ProtocolError> {
        let mut codec = FrameCodec::new();
        let mut sequence = 0u32;

        while let Some(frame) = codec.read_frame(&mut conn).await? {
            let request = match rmp_serde::from_slice::<AgentRequest>(&frame.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "undecodable agent request");
                    let details = ErrorDetails::new(
                        ErrorCode::InvalidRequest,
                        format!("invalid agent request: {e}"),
                    );
                    let payload = rmp_serde::to_vec(&details)
                        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                    let seq = sequence;
                    sequence = sequence.wrapping_add(1);
                    codec
                        .write_frame(&mut conn, &Frame::error(seq, Bytes::from(payload)))
                        .await?;
                    continue;
                }
            };

            debug!(request_id = %request.id(), "agent request");

            match request {
                AgentRequest::GetAgentCard { id } => {
                    let (tx, rx) = mpsc::channel(1);
                    let _ = tx
                        .send(AgentEvent::Card {
                            id,
                            card: self.card.clone(),
                        })
                        .await;
                    drop(tx);
                    forward_events(&mut codec, &mut conn, rx, &mut sequence).await?;
                }

                AgentRequest::Cancel { id } => {
                    let (tx, rx) = mpsc::channel(1);
                    self.executor.cancel(id, &tx).await;
                    drop(tx);
                    forward_events(&mut codec, &mut conn, rx, &mut sequence).await?;
                }

                AgentRequest::SendMessage { id, message } => {
                    self.state.increment_tasks();
                    let (tx, rx) = mpsc::channel(8);
                    self.executor.execute_unary(id, &message, &tx).await;
                    drop(tx);
                    let forwarded = forward_events(&mut codec, &mut conn, rx, &mut sequence).await;
                    self.state.decrement_tasks();
                    forwarded?;
                }

                AgentRequest::SendStreamingMessage { id, message } => {
                    self.state.increment_tasks();
                    let (tx, rx) = mpsc::channel(8);
                    // Execute and forward concurrently so working
                    // updates flush as they are produced.
                    let (_, forwarded) = tokio::join!(
                        async {
                            self.executor.execute(id, &message, &tx).await;
                            drop(tx);
                        },
                        forward_events(&mut codec, &mut conn, rx, &mut sequence),
                    );
                    self.state.decrement_tasks();
                    forwarded?;
                }
            }
        }

        Ok(())
    }
}
