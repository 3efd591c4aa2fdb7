//! Typed clients for the Control and Agent surfaces

use latis_proto::{
    AgentCard, AgentEvent, AgentMessage, AgentRequest, ControlRequest, ControlResponse,
    NodeStatus, ProtocolError, RpcClient, TaskState,
};
use latis_transport::{MuxDialer, StreamConn, TransportError};
use std::net::SocketAddr;
use thiserror::Error;

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial or stream-open failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Framing or remote RPC failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The reply did not match the request
    #[error("unexpected reply")]
    UnexpectedReply,

    /// The agent reported the task failed
    #[error("task failed: {0}")]
    TaskFailed(String),
}

/// Client for the Control surface of one peer
pub struct ControlClient {
    rpc: RpcClient<StreamConn>,
}

impl ControlClient {
    /// Open a control stream to `addr` through the dialer
    pub async fn connect(dialer: &MuxDialer, addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = dialer.dial_control(addr).await?;
        Ok(Self {
            rpc: RpcClient::new(stream),
        })
    }

    /// Health check; returns `(ping_timestamp, pong_timestamp)`
    pub async fn ping(&mut self, timestamp: i64) -> Result<(i64, i64), ClientError> {
        let response: ControlResponse = self.rpc.call(&ControlRequest::ping(timestamp)).await?;
        match response {
            ControlResponse::Pong {
                ping_timestamp,
                pong_timestamp,
                ..
            } => Ok((ping_timestamp, pong_timestamp)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Fetch the peer's status snapshot
    pub async fn get_status(&mut self) -> Result<NodeStatus, ClientError> {
        let response: ControlResponse = self.rpc.call(&ControlRequest::get_status()).await?;
        match response {
            ControlResponse::Status { status, .. } => Ok(status),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Request shutdown; returns `(accepted, rejection_reason)`
    pub async fn shutdown(
        &mut self,
        graceful: bool,
        timeout_seconds: i64,
        reason: &str,
    ) -> Result<(bool, String), ClientError> {
        let response: ControlResponse = self
            .rpc
            .call(&ControlRequest::shutdown(graceful, timeout_seconds, reason))
            .await?;
        match response {
            ControlResponse::ShutdownAck {
                accepted,
                rejection_reason,
                ..
            } => Ok((accepted, rejection_reason)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}

/// Client for the Agent surface of one peer
pub struct AgentClient {
    rpc: RpcClient<StreamConn>,
}

impl AgentClient {
    /// Open an agent stream to `addr` through the dialer
    pub async fn connect(dialer: &MuxDialer, addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = dialer.dial_agent(addr).await?;
        Ok(Self {
            rpc: RpcClient::new(stream),
        })
    }

    /// Send a message and wait for the agent's single reply message
    pub async fn send_message(&mut self, text: &str) -> Result<AgentMessage, ClientError> {
        let request = AgentRequest::send_message(AgentMessage::user_text(text));
        let event: AgentEvent = self.rpc.call(&request).await?;
        match event {
            AgentEvent::Message { message, .. } => Ok(message),
            AgentEvent::StatusUpdate {
                state: TaskState::Failed,
                message,
                ..
            } => Err(ClientError::TaskFailed(
                message
                    .and_then(|m| m.first_text().map(str::to_string))
                    .unwrap_or_default(),
            )),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Send a message and collect the streamed status updates
    pub async fn send_streaming_message(
        &mut self,
        text: &str,
    ) -> Result<Vec<AgentEvent>, ClientError> {
        let request = AgentRequest::send_streaming_message(AgentMessage::user_text(text));
        let stream = self.rpc.call_streaming::<_, AgentEvent>(&request).await?;
        Ok(stream.collect().await?)
    }

    /// Cancel the current task; returns the final status update
    pub async fn cancel(&mut self) -> Result<AgentEvent, ClientError> {
        let event: AgentEvent = self.rpc.call(&AgentRequest::cancel()).await?;
        match event {
            AgentEvent::StatusUpdate { .. } => Ok(event),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Fetch the peer's capability document
    pub async fn get_agent_card(&mut self) -> Result<AgentCard, ClientError> {
        let event: AgentEvent = self.rpc.call(&AgentRequest::get_agent_card()).await?;
        match event {
            AgentEvent::Card { card, .. } => Ok(card),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}
