//! Stream types and the sub-stream byte-stream adapter

use crate::TransportError;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// One-byte tag selecting the upper-layer protocol of a sub-stream
///
/// The opener writes the tag as the first byte of every new
/// sub-stream; the acceptor reads exactly one byte before handing the
/// stream upward. All other values are reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamType {
    /// Control surface (ping, status, shutdown)
    Control = 0x01,
    /// Agent surface (message send, capability discovery)
    Agent = 0x02,
}

impl StreamType {
    /// All known stream types
    pub const ALL: [StreamType; 2] = [StreamType::Control, StreamType::Agent];
}

impl TryFrom<u8> for StreamType {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Control),
            0x02 => Ok(Self::Agent),
            other => Err(TransportError::UnknownStreamType(other)),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// A single multiplexed sub-stream presented as a bidirectional
/// byte-stream with the address metadata of its parent connection
///
/// The type-byte prefix has already been consumed by the time a
/// `StreamConn` exists; readers and writers see only payload bytes.
pub struct StreamConn {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl StreamConn {
    pub(crate) fn new(
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            send,
            recv,
            local_addr,
            remote_addr,
        }
    }

    /// Local address of the parent connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote address of the parent connection
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Close both directions of the stream
    pub fn close(&mut self) {
        let _ = self.send.finish();
        let _ = self.recv.stop(quinn::VarInt::from_u32(0));
    }
}

impl fmt::Debug for StreamConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConn")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl AsyncRead for StreamConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for StreamConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().send)
            .poll_write(cx, buf)
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_values() {
        assert_eq!(StreamType::Control as u8, 0x01);
        assert_eq!(StreamType::Agent as u8, 0x02);
    }

    #[test]
    fn test_stream_type_from_byte() {
        assert_eq!(StreamType::try_from(0x01).unwrap(), StreamType::Control);
        assert_eq!(StreamType::try_from(0x02).unwrap(), StreamType::Agent);

        for tag in [0x00u8, 0x03, 0x7f, 0xff] {
            match StreamType::try_from(tag) {
                Err(TransportError::UnknownStreamType(t)) => assert_eq!(t, tag),
                other => panic!("expected unknown stream type, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_stream_type_display() {
        assert_eq!(StreamType::Control.to_string(), "control");
        assert_eq!(StreamType::Agent.to_string(), "agent");
    }
}
