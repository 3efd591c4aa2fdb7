//! Top-level serve loop and shutdown orchestration

use crate::control::{ControlConnHandler, ControlService, ShutdownFn};
use crate::executor::{AgentConnHandler, AgentExecutor};
use crate::llm::Provider;
use crate::state::State;
use latis_proto::rpc::RpcServer;
use latis_proto::{AgentCard, NodeState};
use latis_transport::MuxListener;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Inputs for building a [`Server`]
pub struct ServerConfig {
    /// Identity URI presented on the control surface
    pub identity: String,
    /// LLM back-end handle
    pub provider: Arc<dyn Provider>,
    /// Capability document for the agent surface
    pub agent_card: AgentCard,
    /// Whether agent replies stream
    pub streaming: bool,
}

struct ServerInner {
    listener: MuxListener,
    state: Arc<State>,
    control_server: RpcServer<ControlConnHandler>,
    agent_server: RpcServer<AgentConnHandler>,
    cancel: CancellationToken,
}

/// The daemon's runtime: one RPC server per stream type over one
/// multiplexed listener, plus signal handling and shutdown
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind the runtime to an already-listening mux listener
    pub fn new(listener: MuxListener, config: ServerConfig) -> Self {
        let state = Arc::new(State::new(config.identity));
        let provider_name = config.provider.name().to_string();
        state.set_metadata("provider", provider_name);

        let inner = Arc::new_cyclic(|weak: &Weak<ServerInner>| {
            let weak = weak.clone();
            let shutdown: ShutdownFn = Arc::new(move |graceful, timeout, reason, replied| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                // A fresh task that waits for the accepting RPC to
                // write its reply before the servers are torn down;
                // bounded so a dead connection cannot stall teardown.
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(Duration::from_millis(100), replied).await;
                    ServerInner::trigger_shutdown(&inner, graceful, timeout, reason).await;
                });
            });

            let control_service = ControlService::new(Arc::clone(&state), shutdown);
            let control_server = RpcServer::new(ControlConnHandler::new(control_service));

            let executor = AgentExecutor::new(config.provider, config.streaming);
            let agent_server = RpcServer::new(AgentConnHandler::new(
                executor,
                config.agent_card,
                Arc::clone(&state),
            ));

            ServerInner {
                listener,
                state: Arc::clone(&state),
                control_server,
                agent_server,
                cancel: CancellationToken::new(),
            }
        });

        Self { inner }
    }

    /// Address the node is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.listener.local_addr()
    }

    /// The node's lifecycle state
    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.inner.state)
    }

    /// Run until shutdown or a fatal server error
    pub async fn run(&self) -> anyhow::Result<()> {
        let inner = &self.inner;
        let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(2);

        // Control server
        let control_task = {
            let server = inner.control_server.clone();
            let acceptor = inner.listener.control_listener();
            let cancel = inner.cancel.clone();
            let err_tx = err_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(acceptor).await {
                    if !cancel.is_cancelled() {
                        let _ = err_tx.send(anyhow::anyhow!("control server: {e}")).await;
                    }
                }
            })
        };

        // Agent server
        let agent_task = {
            let server = inner.agent_server.clone();
            let acceptor = inner.listener.agent_listener();
            let cancel = inner.cancel.clone();
            let err_tx = err_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(acceptor).await {
                    if !cancel.is_cancelled() {
                        let _ = err_tx.send(anyhow::anyhow!("agent server: {e}")).await;
                    }
                }
            })
        };

        // Interrupt/terminate run the same shutdown path as the RPC.
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::select! {
                    _ = inner.cancel.cancelled() => {}
                    _ = wait_for_signal() => {
                        info!("received shutdown signal");
                        ServerInner::trigger_shutdown(
                            &inner,
                            true,
                            Duration::from_secs(30),
                            "signal".to_string(),
                        )
                        .await;
                    }
                }
            });
        }

        inner.state.set_ready();
        info!(
            addr = %inner.listener.local_addr(),
            control_stream = %format_args!("0x{:02x}", latis_transport::StreamType::Control as u8),
            agent_stream = %format_args!("0x{:02x}", latis_transport::StreamType::Agent as u8),
            "ready, listening"
        );

        tokio::select! {
            _ = inner.cancel.cancelled() => {
                info!("shutdown in progress");
            }
            Some(e) = err_rx.recv() => {
                return Err(e);
            }
        }

        // The serve tasks end once the listener's acceptor channels
        // close.
        let _ = control_task.await;
        let _ = agent_task.await;
        Ok(())
    }

    /// Run the shutdown sequence; the same path the Shutdown RPC and
    /// the signal handler use
    pub async fn trigger_shutdown(&self, graceful: bool, timeout: Duration, reason: &str) {
        ServerInner::trigger_shutdown(&self.inner, graceful, timeout, reason.to_string()).await;
    }
}

impl ServerInner {
    async fn trigger_shutdown(
        inner: &Arc<ServerInner>,
        graceful: bool,
        timeout: Duration,
        reason: String,
    ) {
        info!(
            graceful,
            timeout_secs = timeout.as_secs(),
            reason,
            "shutdown requested"
        );

        inner.state.set_draining();

        // A zero timeout means no watchdog: graceful waits forever.
        if graceful && !timeout.is_zero() {
            let watchdog = Arc::clone(inner);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if watchdog.state.state() == NodeState::Stopped {
                    return;
                }
                warn!("graceful shutdown timeout exceeded, forcing stop");
                watchdog.control_server.stop();
                watchdog.agent_server.stop();
            });
        }

        inner.cancel.cancel();

        // The mux listener must close before graceful stop is
        // awaited: closing it ends the acceptor channels, which is
        // what lets the RPC servers' accept loops observe
        // end-of-input and finish draining.
        inner.listener.close();

        if graceful {
            inner.control_server.graceful_stop().await;
            inner.agent_server.graceful_stop().await;
        } else {
            inner.control_server.stop();
            inner.agent_server.stop();
            inner.control_server.graceful_stop().await;
            inner.agent_server.graceful_stop().await;
        }

        inner.state.set_stopped();
        info!("shutdown complete");
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
