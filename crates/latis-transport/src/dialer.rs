//! Pooling dialer

use crate::{MuxConn, StreamConn, StreamType, TransportError};
use quinn::crypto::rustls::QuicClientConfig;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Dials peers and pools one multiplexed connection per address
///
/// The pool lock is held only around map operations, never across the
/// dial itself; two concurrent dials to the same address resolve by
/// closing the loser. A monitor task evicts entries whose connection
/// closed.
pub struct MuxDialer {
    endpoint: quinn::Endpoint,
    server_name: String,
    conns: Arc<Mutex<HashMap<SocketAddr, MuxConn>>>,
}

impl MuxDialer {
    /// Create a dialer from an mTLS client config
    ///
    /// `server_name` is the name expected in the server's certificate
    /// (`localhost` for development deployments).
    pub fn new(
        tls: rustls::ClientConfig,
        server_name: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let crypto =
            QuicClientConfig::try_from(tls).map_err(|e| TransportError::TlsConfig(e.to_string()))?;

        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut endpoint = quinn::Endpoint::client(bind)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        Ok(Self {
            endpoint,
            server_name: server_name.into(),
            conns: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Open a stream of the given type to `addr`
    ///
    /// Reuses the pooled connection when one exists. If opening the
    /// stream fails on a pooled connection it is evicted and the dial
    /// retried exactly once; a second failure is surfaced.
    pub async fn dial(
        &self,
        addr: SocketAddr,
        stream_type: StreamType,
    ) -> Result<StreamConn, TransportError> {
        let conn = self.get_or_create(addr).await?;

        match conn.open_stream(stream_type).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "stream open failed, reconnecting");
                self.remove(addr, conn.stable_id());
                let conn = self.get_or_create(addr).await?;
                conn.open_stream(stream_type).await
            }
        }
    }

    /// Open a control stream to `addr`
    pub async fn dial_control(&self, addr: SocketAddr) -> Result<StreamConn, TransportError> {
        self.dial(addr, StreamType::Control).await
    }

    /// Open an agent stream to `addr`
    pub async fn dial_agent(&self, addr: SocketAddr) -> Result<StreamConn, TransportError> {
        self.dial(addr, StreamType::Agent).await
    }

    async fn get_or_create(&self, addr: SocketAddr) -> Result<MuxConn, TransportError> {
        if let Some(conn) = self.conns.lock().get(&addr) {
            debug!(%addr, "reusing connection");
            return Ok(conn.clone());
        }

        debug!(%addr, "establishing connection");
        let connecting = self.endpoint.connect(addr, &self.server_name)?;
        let conn = connecting.await?;
        let mux = MuxConn::new(conn, self.endpoint.local_addr()?);

        let existing = {
            let mut pool = self.conns.lock();
            match pool.get(&addr) {
                // Another task won the race; ours is surplus.
                Some(existing) => Some(existing.clone()),
                None => {
                    pool.insert(addr, mux.clone());
                    None
                }
            }
        };
        if let Some(existing) = existing {
            mux.close();
            return Ok(existing);
        }

        debug!(%addr, "connection established");

        // Evict the pool entry once the connection closes.
        let monitor = mux.clone();
        let pool = Arc::clone(&self.conns);
        tokio::spawn(async move {
            monitor.closed().await;
            debug!(%addr, "connection closed");
            let mut pool = pool.lock();
            if let Some(current) = pool.get(&addr) {
                if current.stable_id() == monitor.stable_id() {
                    pool.remove(&addr);
                }
            }
        });

        Ok(mux)
    }

    fn remove(&self, addr: SocketAddr, stable_id: usize) {
        let mut pool = self.conns.lock();
        if let Some(current) = pool.get(&addr) {
            if current.stable_id() == stable_id {
                pool.remove(&addr);
            }
        }
    }

    /// Number of pooled connections
    pub fn pooled_connections(&self) -> usize {
        self.conns.lock().len()
    }

    /// Close all pooled connections; idempotent
    pub fn close(&self) {
        let drained: Vec<MuxConn> = {
            let mut pool = self.conns.lock();
            pool.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close();
        }
    }
}

impl Drop for MuxDialer {
    fn drop(&mut self) {
        self.close();
    }
}
