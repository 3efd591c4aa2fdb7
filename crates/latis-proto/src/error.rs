//! Error types for protocol operations

use crate::message::ErrorDetails;
use std::io;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid frame format
    #[error("invalid frame format")]
    InvalidFrame,

    /// Frame too large
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Stream closed before a reply arrived
    #[error("stream closed")]
    StreamClosed,

    /// I/O error on the underlying byte-stream
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Error reported by the remote peer
    #[error("remote error: {0}")]
    Remote(ErrorDetails),
}
