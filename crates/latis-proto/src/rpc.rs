//! RPC server and client machinery
//!
//! One RPC connection rides one transport sub-stream. The server
//! accepts connections from a [`StreamAcceptor`], serves each on its
//! own task, and supports both graceful drain and hard stop. Neither
//! side knows anything about the transport or stream-type prefixes.

use crate::{codec::FrameCodec, frame::Frame, message::ErrorDetails, ProtocolError};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Source of inbound RPC connections
///
/// `accept` returns `None` on end-of-input, after which the server's
/// accept loop exits and graceful stop can complete.
#[async_trait::async_trait]
pub trait StreamAcceptor: Send + Sync + 'static {
    /// Connection type produced by this acceptor
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next inbound connection
    async fn accept(&self) -> Option<Self::Conn>;
}

/// Serves a single RPC connection until it closes
#[async_trait::async_trait]
pub trait ConnectionHandler<C>: Send + Sync + 'static
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Serve one connection to completion
    async fn serve_connection(&self, conn: C) -> Result<(), ProtocolError>;
}

/// Connection-oriented RPC server
///
/// `graceful_stop` only returns once the accept loop has observed
/// end-of-input and every in-flight connection handler has finished.
/// The acceptor must therefore be closed (by closing the transport
/// listener) before awaiting it, or it will never return.
pub struct RpcServer<H> {
    handler: Arc<H>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl<H> Clone for RpcServer<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H> RpcServer<H> {
    /// Create a new server around a connection handler
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the accept loop until end-of-input or hard stop
    pub async fn serve<L>(&self, acceptor: L) -> Result<(), ProtocolError>
    where
        L: StreamAcceptor,
        H: ConnectionHandler<L::Conn>,
    {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("rpc server stopped");
                    break;
                }
                conn = acceptor.accept() => {
                    let Some(conn) = conn else {
                        debug!("acceptor closed, rpc server draining");
                        break;
                    };
                    let handler = Arc::clone(&self.handler);
                    let token = self.shutdown.clone();
                    self.tracker.spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            res = handler.serve_connection(conn) => {
                                if let Err(e) = res {
                                    debug!(error = %e, "connection handler ended with error");
                                }
                            }
                        }
                    });
                }
            }
        }

        self.tracker.close();
        Ok(())
    }

    /// Wait for the accept loop to exit and in-flight handlers to drain
    pub async fn graceful_stop(&self) {
        self.tracker.wait().await;
    }

    /// Abort the accept loop and all in-flight handlers
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }
}

/// RPC client bound to a single byte-stream
pub struct RpcClient<C> {
    conn: C,
    codec: FrameCodec,
    sequence: u32,
}

impl<C> RpcClient<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a client around an established connection
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            codec: FrameCodec::new(),
            sequence: 0,
        }
    }

    /// Consume the client, returning the underlying connection
    pub fn into_inner(self) -> C {
        self.conn
    }

    async fn send<Req>(&mut self, request: &Req) -> Result<(), ProtocolError>
    where
        Req: Serialize,
    {
        let payload =
            rmp_serde::to_vec(request).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.codec
            .write_frame(&mut self.conn, &Frame::data(sequence, Bytes::from(payload)))
            .await
    }

    /// Issue a unary call: one request frame, one reply frame
    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ProtocolError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        let frame = self
            .codec
            .read_frame(&mut self.conn)
            .await?
            .ok_or(ProtocolError::StreamClosed)?;
        decode_reply(&frame)
    }

    /// Issue a server-streaming call: one request frame, replies until
    /// a frame carries the end-of-stream flag
    pub async fn call_streaming<Req, Resp>(
        &mut self,
        request: &Req,
    ) -> Result<ReplyStream<'_, C, Resp>, ProtocolError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        Ok(ReplyStream {
            client: self,
            done: false,
            _resp: PhantomData,
        })
    }
}

fn decode_reply<Resp>(frame: &Frame) -> Result<Resp, ProtocolError>
where
    Resp: DeserializeOwned,
{
    if frame.is_error() {
        let details: ErrorDetails = rmp_serde::from_slice(&frame.payload)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        return Err(ProtocolError::Remote(details));
    }
    rmp_serde::from_slice(&frame.payload).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Lazy sequence of replies to a streaming call
pub struct ReplyStream<'a, C, Resp> {
    client: &'a mut RpcClient<C>,
    done: bool,
    _resp: PhantomData<Resp>,
}

impl<C, Resp> ReplyStream<'_, C, Resp>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    Resp: DeserializeOwned,
{
    /// Read the next reply, or `None` once the stream has ended
    pub async fn next(&mut self) -> Result<Option<Resp>, ProtocolError> {
        if self.done {
            return Ok(None);
        }
        let frame = match self
            .client
            .codec
            .read_frame(&mut self.client.conn)
            .await?
        {
            Some(frame) => frame,
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        if frame.is_last() {
            self.done = true;
        }
        decode_reply(&frame).map(Some)
    }

    /// Drain the stream into a vector
    pub async fn collect(mut self) -> Result<Vec<Resp>, ProtocolError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;
    use tokio::sync::{mpsc, Mutex};
    use tokio::time::{timeout, Duration};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct EchoRequest {
        text: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct EchoReply {
        text: String,
    }

    /// Acceptor fed from an mpsc channel of in-memory duplex streams
    struct ChannelAcceptor {
        rx: Mutex<mpsc::Receiver<DuplexStream>>,
    }

    #[async_trait::async_trait]
    impl StreamAcceptor for ChannelAcceptor {
        type Conn = DuplexStream;

        async fn accept(&self) -> Option<DuplexStream> {
            self.rx.lock().await.recv().await
        }
    }

    /// Echoes every request back as a final reply frame
    struct EchoHandler {
        served: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl<C> ConnectionHandler<C> for EchoHandler
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        async fn serve_connection(&self, mut conn: C) -> Result<(), ProtocolError> {
            let mut codec = FrameCodec::new();
            while let Some(frame) = codec.read_frame(&mut conn).await? {
                let request: EchoRequest = rmp_serde::from_slice(&frame.payload)
                    .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                let reply = EchoReply { text: request.text };
                let payload = rmp_serde::to_vec(&reply)
                    .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                codec
                    .write_frame(&mut conn, &Frame::last(frame.sequence, Bytes::from(payload)))
                    .await?;
            }
            self.served.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn spawn_server() -> (
        RpcServer<EchoHandler>,
        mpsc::Sender<DuplexStream>,
        tokio::task::JoinHandle<Result<(), ProtocolError>>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let server = RpcServer::new(EchoHandler {
            served: AtomicUsize::new(0),
        });
        let serve = {
            let server = server.clone();
            tokio::spawn(async move {
                server
                    .serve(ChannelAcceptor {
                        rx: Mutex::new(rx),
                    })
                    .await
            })
        };
        (server, tx, serve)
    }

    #[tokio::test]
    async fn test_unary_call() {
        let (_server, tx, _serve) = spawn_server();

        let (client_side, server_side) = tokio::io::duplex(4096);
        tx.send(server_side).await.unwrap();

        let mut client = RpcClient::new(client_side);
        let reply: EchoReply = client
            .call(&EchoRequest {
                text: "hello".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.text, "hello");
    }

    #[tokio::test]
    async fn test_multiple_calls_one_connection() {
        let (_server, tx, _serve) = spawn_server();

        let (client_side, server_side) = tokio::io::duplex(4096);
        tx.send(server_side).await.unwrap();

        let mut client = RpcClient::new(client_side);
        for i in 0..5 {
            let text = format!("call-{i}");
            let reply: EchoReply = client
                .call(&EchoRequest { text: text.clone() })
                .await
                .unwrap();
            assert_eq!(reply.text, text);
        }
    }

    #[tokio::test]
    async fn test_graceful_stop_waits_for_acceptor_close() {
        let (server, tx, serve) = spawn_server();

        // With the acceptor still open, graceful stop must not finish.
        let pending = timeout(Duration::from_millis(200), server.graceful_stop()).await;
        assert!(pending.is_err(), "graceful stop returned too early");

        // Closing the acceptor lets the accept loop exit.
        drop(tx);
        timeout(Duration::from_secs(1), server.graceful_stop())
            .await
            .unwrap();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hard_stop_aborts_in_flight() {
        let (server, tx, serve) = spawn_server();

        // A connection with no traffic keeps its handler in-flight.
        let (client_side, server_side) = tokio::io::duplex(4096);
        tx.send(server_side).await.unwrap();

        server.stop();
        timeout(Duration::from_secs(1), server.graceful_stop())
            .await
            .unwrap();
        serve.await.unwrap().unwrap();
        drop(client_side);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        // A handler that always replies with an error frame.
        struct FailingHandler;

        #[async_trait::async_trait]
        impl<C> ConnectionHandler<C> for FailingHandler
        where
            C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        {
            async fn serve_connection(&self, mut conn: C) -> Result<(), ProtocolError> {
                let mut codec = FrameCodec::new();
                while let Some(frame) = codec.read_frame(&mut conn).await? {
                    let details =
                        ErrorDetails::new(crate::message::ErrorCode::Unsupported, "nope");
                    let payload = rmp_serde::to_vec(&details)
                        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                    codec
                        .write_frame(
                            &mut conn,
                            &Frame::error(frame.sequence, Bytes::from(payload)),
                        )
                        .await?;
                }
                Ok(())
            }
        }

        let (tx, rx) = mpsc::channel(8);
        let server = RpcServer::new(FailingHandler);
        let server2 = server.clone();
        tokio::spawn(async move {
            server2
                .serve(ChannelAcceptor {
                    rx: Mutex::new(rx),
                })
                .await
        });

        let (client_side, server_side) = tokio::io::duplex(4096);
        tx.send(server_side).await.unwrap();

        let mut client = RpcClient::new(client_side);
        let result: Result<EchoReply, _> = client
            .call(&EchoRequest {
                text: "ignored".into(),
            })
            .await;
        match result {
            Err(ProtocolError::Remote(details)) => assert_eq!(details.message, "nope"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}
