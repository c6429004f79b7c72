//! Process termination and connection draining

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outcome of draining connections at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that finished within the grace period
    pub drained: usize,
    /// Connections still running when the grace period ran out
    pub aborted: usize,
}

/// Resolves on SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Wait up to `grace` for `connections` to finish, then abort the rest.
pub async fn drain(mut connections: JoinSet<()>, grace: Duration) -> ShutdownReport {
    let in_flight = connections.len();
    if in_flight > 0 {
        info!(in_flight, grace_ms = grace.as_millis() as u64, "Draining connections");
    }

    let mut drained = 0;
    let _ = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {
            drained += 1;
        }
    })
    .await;

    let aborted = connections.len();
    if aborted > 0 {
        warn!(aborted, "Grace period elapsed, aborting in-flight connections");
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }

    ShutdownReport { drained, aborted }
}
