//! Multiplexed listener with per-type acceptors

use crate::{MuxConn, StreamConn, StreamType, TransportError};
use latis_proto::rpc::StreamAcceptor;
use quinn::crypto::rustls::QuicServerConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of each per-type acceptor channel
pub const ACCEPT_QUEUE: usize = 16;

struct ListenerShared {
    closed: bool,
    conns: HashMap<usize, MuxConn>,
    senders: HashMap<StreamType, mpsc::Sender<StreamConn>>,
}

/// Accepts connections and routes sub-streams by type
///
/// One accept task pulls connections from the endpoint; each accepted
/// connection gets its own stream-accept task that reads the type
/// byte and delivers the stream to the matching acceptor channel.
/// Unknown types close the stream and keep the connection. Acceptor
/// channels are small and bounded: a slow upper-layer server stalls
/// the per-connection task, which lets the transport push back on the
/// peer.
pub struct MuxListener {
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
    shared: Arc<Mutex<ListenerShared>>,
    receivers: HashMap<StreamType, Arc<AsyncMutex<mpsc::Receiver<StreamConn>>>>,
    cancel: CancellationToken,
}

impl MuxListener {
    /// Bind to `addr` and start accepting in the background
    pub fn listen(addr: SocketAddr, tls: rustls::ServerConfig) -> Result<Self, TransportError> {
        let crypto =
            QuicServerConfig::try_from(tls).map_err(|e| TransportError::TlsConfig(e.to_string()))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        let endpoint = quinn::Endpoint::server(server_config, addr)?;
        let local_addr = endpoint.local_addr()?;

        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for stream_type in StreamType::ALL {
            let (tx, rx) = mpsc::channel(ACCEPT_QUEUE);
            senders.insert(stream_type, tx);
            receivers.insert(stream_type, Arc::new(AsyncMutex::new(rx)));
        }

        let shared = Arc::new(Mutex::new(ListenerShared {
            closed: false,
            conns: HashMap::new(),
            senders,
        }));
        let cancel = CancellationToken::new();

        tokio::spawn(accept_loop(
            endpoint.clone(),
            local_addr,
            Arc::clone(&shared),
            cancel.clone(),
        ));

        debug!(%local_addr, "mux listener started");

        Ok(Self {
            endpoint,
            local_addr,
            shared,
            receivers,
            cancel,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Acceptor handle for one stream type
    ///
    /// Handles for the same type share one acceptor channel; each
    /// delivered stream is accepted exactly once.
    pub fn typed_listener(&self, stream_type: StreamType) -> TypedListener {
        TypedListener {
            stream_type,
            receiver: Arc::clone(&self.receivers[&stream_type]),
        }
    }

    /// Acceptor handle for control streams
    pub fn control_listener(&self) -> TypedListener {
        self.typed_listener(StreamType::Control)
    }

    /// Acceptor handle for agent streams
    pub fn agent_listener(&self) -> TypedListener {
        self.typed_listener(StreamType::Agent)
    }

    /// Number of currently tracked live connections
    pub fn connection_count(&self) -> usize {
        self.shared.lock().conns.len()
    }

    /// Shut the listener down
    ///
    /// Ordering matters: mark closed, cancel the scope, close the
    /// acceptor channels (upper servers observe end-of-input), close
    /// tracked connections, then close the endpoint. Idempotent.
    pub fn close(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
            self.cancel.cancel();
            shared.senders.clear();
            for (_, conn) in shared.conns.drain() {
                conn.close();
            }
        }
        self.endpoint.close(quinn::VarInt::from_u32(0), b"listener closed");
        debug!(local_addr = %self.local_addr, "mux listener closed");
    }
}

impl Drop for MuxListener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
    shared: Arc<Mutex<ListenerShared>>,
    cancel: CancellationToken,
) {
    loop {
        let incoming = tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        let shared = Arc::clone(&shared);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(error = %e, "handshake failed");
                    return;
                }
            };
            let mux = MuxConn::new(conn, local_addr);

            {
                let mut guard = shared.lock();
                if guard.closed {
                    drop(guard);
                    mux.close();
                    return;
                }
                guard.conns.insert(mux.stable_id(), mux.clone());
            }

            handle_connection(mux, shared, cancel).await;
        });
    }
    debug!("accept loop exited");
}

/// Accept streams from one connection and route them by type
async fn handle_connection(
    mux: MuxConn,
    shared: Arc<Mutex<ListenerShared>>,
    cancel: CancellationToken,
) {
    debug!(remote = %mux.remote_addr(), "handling connection");

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = mux.accept_stream() => accepted,
        };

        let (mut stream, tag) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "accept stream ended");
                break;
            }
        };

        let stream_type = match StreamType::try_from(tag) {
            Ok(stream_type) => stream_type,
            Err(_) => {
                warn!(tag = %format_args!("0x{tag:02x}"), "unknown stream type");
                stream.close();
                continue;
            }
        };

        debug!(%stream_type, remote = %stream.remote_addr(), "stream accepted");

        let sender = {
            let guard = shared.lock();
            guard.senders.get(&stream_type).cloned()
        };
        let Some(sender) = sender else {
            // Listener is closing.
            stream.close();
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                stream.close();
                break;
            }
            permit = sender.reserve() => {
                match permit {
                    Ok(permit) => permit.send(stream),
                    Err(_) => stream.close(),
                }
            }
        }
    }

    shared.lock().conns.remove(&mux.stable_id());
    debug!(remote = %mux.remote_addr(), "connection handler done");
}

/// Listener-like handle that accepts sub-streams of a single type
pub struct TypedListener {
    stream_type: StreamType,
    receiver: Arc<AsyncMutex<mpsc::Receiver<StreamConn>>>,
}

impl TypedListener {
    /// The stream type this handle accepts
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }
}

#[async_trait::async_trait]
impl StreamAcceptor for TypedListener {
    type Conn = StreamConn;

    async fn accept(&self) -> Option<StreamConn> {
        // Returns `None` once the listener has closed the channel and
        // any queued streams are drained.
        self.receiver.lock().await.recv().await
    }
}
