//! Error types for transport operations

use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error (socket bind, address resolution)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A rustls configuration was not usable for QUIC
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    /// Dialing failed before the handshake started
    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    /// The connection failed or was closed
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    /// Writing to a sub-stream failed
    #[error("stream write error: {0}")]
    Write(#[from] quinn::WriteError),

    /// Reading from a sub-stream failed
    #[error("stream read error: {0}")]
    Read(String),

    /// The one-byte prefix did not name a known stream type
    #[error("unknown stream type: 0x{0:02x}")]
    UnknownStreamType(u8),
}
