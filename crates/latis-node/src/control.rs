//! Control surface: ping, status, shutdown

use crate::state::State;
use bytes::Bytes;
use latis_proto::rpc::ConnectionHandler;
use latis_proto::{
    ControlRequest, ControlResponse, ErrorCode, ErrorDetails, Frame, FrameCodec, NodeState,
    ProtocolError,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Invoked when a shutdown is requested via the Control RPC
///
/// The callee must not block: teardown is expected to run on a fresh
/// task. The receiver resolves once the accepting RPC's reply has
/// been written; teardown waits for it (with a bounded fallback)
/// before closing connections, so the caller always sees its
/// `ShutdownAck`.
pub type ShutdownFn = Arc<dyn Fn(bool, Duration, String, oneshot::Receiver<()>) + Send + Sync>;

/// Handlers for the Control RPCs
#[derive(Clone)]
pub struct ControlService {
    state: Arc<State>,
    shutdown: ShutdownFn,
}

impl ControlService {
    /// Create a new control service
    pub fn new(state: Arc<State>, shutdown: ShutdownFn) -> Self {
        Self { state, shutdown }
    }

    /// Dispatch one control request
    ///
    /// An accepted shutdown also returns the sender the transport
    /// layer fires once the reply frame has been written; the
    /// scheduled teardown waits on it.
    pub async fn handle(
        &self,
        request: ControlRequest,
    ) -> (ControlResponse, Option<oneshot::Sender<()>>) {
        match request {
            ControlRequest::Ping { id, timestamp } => {
                debug!(timestamp, "ping received");
                let response = ControlResponse::Pong {
                    id,
                    ping_timestamp: timestamp,
                    pong_timestamp: now_nanos(),
                };
                (response, None)
            }

            ControlRequest::GetStatus { id } => {
                let status = self.state.status();
                debug!(state = %status.state, "status requested");
                (ControlResponse::Status { id, status }, None)
            }

            ControlRequest::Shutdown {
                id,
                graceful,
                timeout_seconds,
                reason,
            } => {
                let current = self.state.state();
                info!(
                    graceful,
                    timeout_seconds,
                    reason,
                    state = %current,
                    "shutdown RPC received"
                );

                if current == NodeState::Draining || current == NodeState::Stopped {
                    warn!(state = %current, "shutdown rejected: already shutting down");
                    let response = ControlResponse::ShutdownAck {
                        id,
                        accepted: false,
                        rejection_reason: "node is already shutting down".to_string(),
                    };
                    return (response, None);
                }

                let timeout = Duration::from_secs(timeout_seconds.max(0) as u64);
                let (replied_tx, replied_rx) = oneshot::channel();
                (self.shutdown)(graceful, timeout, reason, replied_rx);

                let response = ControlResponse::ShutdownAck {
                    id,
                    accepted: true,
                    rejection_reason: String::new(),
                };
                (response, Some(replied_tx))
            }
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Serves control connections: one request frame in, one reply
/// frame out
pub struct ControlConnHandler {
    service: ControlService,
}

impl ControlConnHandler {
    /// Create a handler around a control service
    pub fn new(service: ControlService) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl<C> ConnectionHandler<C> for ControlConnHandler
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn serve_connection(&self, mut conn: C) -> Result<(), ProtocolError> {
        let mut codec = FrameCodec::new();

        while let Some(frame) = codec.read_frame(&mut conn).await? {
            match rmp_serde::from_slice::<ControlRequest>(&frame.payload) {
                Ok(request) => {
                    let (response, replied) = self.service.handle(request).await;
                    let payload = rmp_serde::to_vec(&response)
                        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                    codec
                        .write_frame(&mut conn, &Frame::last(frame.sequence, Bytes::from(payload)))
                        .await?;
                    if let Some(replied) = replied {
                        let _ = replied.send(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "undecodable control request");
                    let details = ErrorDetails::new(
                        ErrorCode::InvalidRequest,
                        format!("invalid control request: {e}"),
                    );
                    let payload = rmp_serde::to_vec(&details)
                        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                    codec
                        .write_frame(&mut conn, &Frame::error(frame.sequence, Bytes::from(payload)))
                        .await?;
                }
            }
        }

        Ok(())
    }
}
