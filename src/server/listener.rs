use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::http::connection::Connection;
use crate::proxy::LoadBalancer;
use crate::server::shutdown::{self, ShutdownReport};

/// Pause after a failed accept. Errors such as EMFILE persist until
/// descriptors are released.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The inbound listener and the connections it has accepted
pub struct Server {
    listener: TcpListener,
    balancer: Arc<LoadBalancer>,
    grace: Duration,
}

impl Server {
    /// Bind the listen address. Failure here is fatal for the process.
    pub async fn bind(addr: &str, balancer: Arc<LoadBalancer>, grace: Duration) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            balancer,
            grace,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until `signal` completes, then drain.
    ///
    /// The listener is closed the moment the signal fires, so later
    /// connection attempts are refused rather than queued.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            balancer,
            grace,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                _ = &mut signal => {
                    info!("Shutdown signal received");
                    break;
                }

                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            back_off_after_accept_error(&e).await;
                            continue;
                        }
                    };
                    debug!("Accepted connection from {}", peer);

                    let balancer = Arc::clone(&balancer);
                    let shutdown = shutdown_rx.clone();
                    connections.spawn(async move {
                        let mut conn = Connection::new(socket, peer, balancer, shutdown);
                        if let Err(e) = conn.run().await {
                            tracing::error!("Connection error from {}: {}", peer, e);
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        let _ = shutdown_tx.send(true);

        Ok(shutdown::drain(connections, grace).await)
    }
}

async fn back_off_after_accept_error(e: &std::io::Error) {
    warn!(error = %e, backoff_ms = ACCEPT_BACKOFF.as_millis() as u64, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
