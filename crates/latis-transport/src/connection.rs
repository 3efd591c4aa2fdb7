//! A single multiplexed connection

use crate::{StreamConn, StreamType, TransportError};
use std::net::SocketAddr;
use tracing::debug;

/// One multiplexed transport connection
///
/// Owns exactly one underlying QUIC connection. Cheap to clone; all
/// clones share the connection. Ownership is exclusive to the parent
/// `MuxListener` or `MuxDialer`, which closes it when it closes.
#[derive(Clone)]
pub struct MuxConn {
    conn: quinn::Connection,
    local_addr: SocketAddr,
}

impl MuxConn {
    pub(crate) fn new(conn: quinn::Connection, local_addr: SocketAddr) -> Self {
        Self { conn, local_addr }
    }

    /// Open a new sub-stream and write its type byte
    ///
    /// The tag is written synchronously before the stream is returned;
    /// if the write fails the stream is discarded and the error
    /// surfaced. A closed connection fails without reconnecting (pool
    /// recovery is the dialer's concern).
    pub async fn open_stream(&self, stream_type: StreamType) -> Result<StreamConn, TransportError> {
        let (mut send, recv) = self.conn.open_bi().await?;

        if let Err(e) = send.write_all(&[stream_type as u8]).await {
            let _ = send.reset(quinn::VarInt::from_u32(0));
            return Err(e.into());
        }

        debug!(%stream_type, remote = %self.remote_addr(), "opened stream");
        Ok(StreamConn::new(
            send,
            recv,
            self.local_addr,
            self.remote_addr(),
        ))
    }

    /// Accept the next inbound sub-stream and read its type byte
    ///
    /// Unknown tags are returned unchanged; routing policy belongs to
    /// the listener.
    pub async fn accept_stream(&self) -> Result<(StreamConn, u8), TransportError> {
        let (send, mut recv) = self.conn.accept_bi().await?;

        let mut tag = [0u8; 1];
        recv.read_exact(&mut tag)
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;

        Ok((
            StreamConn::new(send, recv, self.local_addr, self.remote_addr()),
            tag[0],
        ))
    }

    /// Close the underlying connection, ending all of its streams
    pub fn close(&self) {
        self.conn.close(quinn::VarInt::from_u32(0), b"closed");
    }

    /// Resolves when the underlying connection closes for any reason
    pub async fn closed(&self) {
        let _ = self.conn.closed().await;
    }

    /// Remote address of the connection
    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_address()
    }

    /// Local address of the owning endpoint
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Identifier that is stable for the lifetime of the connection
    pub fn stable_id(&self) -> usize {
        self.conn.stable_id()
    }
}

impl std::fmt::Debug for MuxConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxConn")
            .field("remote_addr", &self.remote_addr())
            .field("stable_id", &self.stable_id())
            .finish()
    }
}
