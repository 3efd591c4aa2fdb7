//! # Latis Protocol
//!
//! Wire frames, message types, and RPC machinery for the Latis
//! control plane. One RPC connection maps onto one multiplexed
//! transport sub-stream; this crate is byte-stream generic and has no
//! knowledge of the transport underneath it.

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// Control and Agent message types
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// RPC server and client machinery
pub mod rpc;

/// Error types for protocol operations
pub mod error;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags};
pub use message::{
    AgentCard, AgentEvent, AgentMessage, AgentRequest, ControlRequest, ControlResponse, ErrorCode,
    ErrorDetails, MessagePart, MessageRole, NodeState, NodeStatus, TaskState,
};
pub use rpc::{ConnectionHandler, ReplyStream, RpcClient, RpcServer, StreamAcceptor};
