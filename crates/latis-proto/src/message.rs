//! Control and Agent message types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum NodeState {
    /// Node is initializing
    Starting = 1,
    /// Node is serving and idle
    Ready = 2,
    /// Node is serving with at least one active task
    Busy = 3,
    /// Node is shutting down, draining in-flight work
    Draining = 4,
    /// Node has stopped
    Stopped = 5,
}

impl NodeState {
    /// Convert from the wire integer representation
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Starting),
            2 => Some(Self::Ready),
            3 => Some(Self::Busy),
            4 => Some(Self::Draining),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Lowercase name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a node's runtime status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Identity URI embedded in the node's leaf certificate
    pub identity: String,
    /// Current lifecycle state
    pub state: NodeState,
    /// Seconds since the node started
    pub uptime_seconds: i64,
    /// Number of in-flight tasks
    pub active_tasks: i32,
    /// Free-form key/value metadata
    pub metadata: HashMap<String, String>,
}

/// Requests on the Control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Health check with latency measurement
    Ping {
        /// Request ID for correlation
        id: Uuid,
        /// Caller's send timestamp, nanoseconds since the epoch
        timestamp: i64,
    },

    /// Request a status snapshot
    GetStatus {
        /// Request ID for correlation
        id: Uuid,
    },

    /// Request node termination
    Shutdown {
        /// Request ID for correlation
        id: Uuid,
        /// Drain in-flight RPCs before stopping
        graceful: bool,
        /// Force a hard stop after this many seconds; 0 disables the watchdog
        timeout_seconds: i64,
        /// Human-readable reason, recorded in logs
        reason: String,
    },
}

impl ControlRequest {
    /// Get the request ID
    pub fn id(&self) -> Uuid {
        match self {
            Self::Ping { id, .. } => *id,
            Self::GetStatus { id } => *id,
            Self::Shutdown { id, .. } => *id,
        }
    }

    /// Create a ping request
    pub fn ping(timestamp: i64) -> Self {
        Self::Ping {
            id: Uuid::new_v4(),
            timestamp,
        }
    }

    /// Create a status request
    pub fn get_status() -> Self {
        Self::GetStatus { id: Uuid::new_v4() }
    }

    /// Create a shutdown request
    pub fn shutdown(graceful: bool, timeout_seconds: i64, reason: impl Into<String>) -> Self {
        Self::Shutdown {
            id: Uuid::new_v4(),
            graceful,
            timeout_seconds,
            reason: reason.into(),
        }
    }
}

/// Replies on the Control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Reply to `Ping`
    Pong {
        /// ID of the request this answers
        id: Uuid,
        /// Timestamp echoed from the request
        ping_timestamp: i64,
        /// Server receive timestamp, nanoseconds since the epoch
        pong_timestamp: i64,
    },

    /// Reply to `GetStatus`
    Status {
        /// ID of the request this answers
        id: Uuid,
        /// Status snapshot
        status: NodeStatus,
    },

    /// Reply to `Shutdown`
    ShutdownAck {
        /// ID of the request this answers
        id: Uuid,
        /// Whether the shutdown was scheduled
        accepted: bool,
        /// Why it was rejected, when `accepted` is false
        rejection_reason: String,
    },
}

impl ControlResponse {
    /// ID of the request this response answers
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Pong { id, .. } => *id,
            Self::Status { id, .. } => *id,
            Self::ShutdownAck { id, .. } => *id,
        }
    }
}

/// Role of an agent message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// Message authored by the calling user
    User,
    /// Message authored by the agent
    Agent,
}

/// One part of an agent message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePart {
    /// Plain text content
    Text {
        /// The text
        text: String,
    },
}

/// A message exchanged on the Agent surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Author role
    pub role: MessageRole,
    /// Message parts
    pub parts: Vec<MessagePart>,
}

impl AgentMessage {
    /// Create a user message with a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Create an agent message with a single text part
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Extract the first text part, if any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::Text { text } => Some(text.as_str()),
        })
    }
}

/// Execution state of an agent task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// The task is producing output
    Working,
    /// The task finished successfully
    Completed,
    /// The task failed
    Failed,
    /// The task was canceled
    Canceled,
}

/// Static capability document for an agent node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Agent name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Agent software version
    pub version: String,
    /// Whether streaming replies are supported
    pub streaming: bool,
}

/// Requests on the Agent surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentRequest {
    /// Send a message, reply with a single agent message
    SendMessage {
        /// Request ID for correlation
        id: Uuid,
        /// The inbound message
        message: AgentMessage,
    },

    /// Send a message, reply with a stream of status updates
    SendStreamingMessage {
        /// Request ID for correlation
        id: Uuid,
        /// The inbound message
        message: AgentMessage,
    },

    /// Fetch the agent's capability document
    GetAgentCard {
        /// Request ID for correlation
        id: Uuid,
    },

    /// Cancel the current task
    Cancel {
        /// Request ID for correlation
        id: Uuid,
    },
}

impl AgentRequest {
    /// Get the request ID
    pub fn id(&self) -> Uuid {
        match self {
            Self::SendMessage { id, .. } => *id,
            Self::SendStreamingMessage { id, .. } => *id,
            Self::GetAgentCard { id } => *id,
            Self::Cancel { id } => *id,
        }
    }

    /// Create a message-send request
    pub fn send_message(message: AgentMessage) -> Self {
        Self::SendMessage {
            id: Uuid::new_v4(),
            message,
        }
    }

    /// Create a streaming message-send request
    pub fn send_streaming_message(message: AgentMessage) -> Self {
        Self::SendStreamingMessage {
            id: Uuid::new_v4(),
            message,
        }
    }

    /// Create an agent-card request
    pub fn get_agent_card() -> Self {
        Self::GetAgentCard { id: Uuid::new_v4() }
    }

    /// Create a cancel request
    pub fn cancel() -> Self {
        Self::Cancel { id: Uuid::new_v4() }
    }
}

/// Events emitted on the Agent surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A complete agent message (non-streaming reply)
    Message {
        /// ID of the request this answers
        id: Uuid,
        /// The agent's message
        message: AgentMessage,
    },

    /// A task status update (streaming reply)
    StatusUpdate {
        /// ID of the request this answers
        id: Uuid,
        /// Task state at the time of the update
        state: TaskState,
        /// Message carried by the update, if any
        message: Option<AgentMessage>,
        /// Whether this is the final event of the task
        is_final: bool,
    },

    /// The agent's capability document
    Card {
        /// ID of the request this answers
        id: Uuid,
        /// The capability document
        card: AgentCard,
    },
}

/// Error codes surfaced to remote callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The request could not be decoded or was malformed
    InvalidRequest,
    /// The operation is not supported by this node
    Unsupported,
    /// The node failed internally while handling the request
    InternalError,
}

/// Error payload carried by error frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
}

impl ErrorDetails {
    /// Create new error details
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}
