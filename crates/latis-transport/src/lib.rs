//! # Latis Transport
//!
//! Multiplexed QUIC transport for the Latis control plane. A single
//! mutually authenticated connection per peer pair carries many
//! type-tagged bidirectional sub-streams; the listener routes inbound
//! streams by their one-byte type prefix to per-type acceptors, and
//! the dialer pools one connection per remote address.

#![warn(missing_docs)]

/// Stream types and the sub-stream byte-stream adapter
pub mod stream;

/// A single multiplexed connection
pub mod connection;

/// Multiplexed listener with per-type acceptors
pub mod listener;

/// Pooling dialer
pub mod dialer;

/// Error types for transport operations
pub mod error;

pub use connection::MuxConn;
pub use dialer::MuxDialer;
pub use error::TransportError;
pub use listener::{MuxListener, TypedListener, ACCEPT_QUEUE};
pub use stream::{StreamConn, StreamType};
