//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Accept client connections within the connection limit
//! - Spawn one driver task per connection with a config snapshot
//! - Apply reloaded configuration to new connections
//! - Drain open connections on shutdown
//!
//! # Design Decisions
//! - Config lives in an `ArcSwap`; connections keep the snapshot they started with
//! - Accept errors are logged, never fatal

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::ProxyConfig;
use crate::lifecycle::Shutdown;
use crate::net::client;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

/// Time allowed for open connections to finish after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP/1.1 front end of the proxy.
pub struct HttpServer {
    config: Arc<ArcSwap<ProxyConfig>>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            tracker: ConnectionTracker::new(),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ProxyConfig> {
        self.config.load_full()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve connections from `listener` until `shutdown` fires, then wait
    /// for open connections to finish.
    ///
    /// Configs received on `config_updates` apply to connections accepted
    /// afterwards. The bind address and connection limit are fixed at start.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: Option<mpsc::UnboundedReceiver<ProxyConfig>>,
        shutdown: Shutdown,
    ) -> Result<(), ListenerError> {
        let local_port = listener.local_addr().map_err(ListenerError::Bind)?.port();
        let listener = Listener::from_listener(listener, self.config.load().listener.max_connections);
        let mut shutdown_rx = shutdown.subscribe();

        tracing::info!(
            port = local_port,
            backend = %self.config.load().backend.address,
            "HTTP server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let config = self.config.load_full();
                        let conn_shutdown = shutdown.subscribe();
                        tokio::spawn(async move {
                            client::serve_connection(stream, peer, config, local_port, conn_shutdown, guard).await;
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e),
                },
                Some(config) = recv_update(&mut config_updates) => {
                    tracing::info!(
                        backend = %config.backend.address,
                        server_name = %config.server.name,
                        "Configuration reloaded"
                    );
                    self.config.store(Arc::new(config));
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        drop(listener);
        let active = self.tracker.active_count();
        tracing::info!(active_connections = active, "Draining connections");
        if tokio::time::timeout(self.drain_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain timeout elapsed, abandoning connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn recv_update(
    updates: &mut Option<mpsc::UnboundedReceiver<ProxyConfig>>,
) -> Option<ProxyConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
