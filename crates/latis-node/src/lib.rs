//! # Latis Node
//!
//! The Latis daemon: a peer-to-peer control-plane node for
//! distributed AI agents. Every node listens for inbound peers and
//! can dial out, serving a Control surface (health, status, shutdown)
//! and an Agent surface (message send, capability discovery) over one
//! multiplexed mTLS transport.

/// Node lifecycle state machine
pub mod state;

/// Control surface handlers
pub mod control;

/// Agent surface execution
pub mod executor;

/// Pluggable LLM providers
pub mod llm;

/// Resolved configuration record
pub mod config;

/// Serve loop and shutdown orchestration
pub mod server;

/// Typed RPC clients
pub mod client;

pub use client::{AgentClient, ClientError, ControlClient};
pub use config::{ConfigError, NodeConfig, ProviderKind};
pub use server::{Server, ServerConfig};
pub use state::State;
