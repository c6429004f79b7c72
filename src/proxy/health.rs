//! Background liveness tracking
//!
//! Instead of probing on the request path, a [`HealthMonitor`] re-probes
//! every backend on an interval and each [`CachedBackend`] answers
//! `is_alive` from the last result. Selection never waits on the network,
//! at the cost of acting on state up to one interval old.

use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::backend::Backend;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Wraps a backend with a cached liveness flag
pub struct CachedBackend {
    inner: Arc<dyn Backend>,
    alive: AtomicBool,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
}

impl CachedBackend {
    /// Starts out live; the first refresh settles the real state.
    pub fn new(inner: Arc<dyn Backend>, failure_threshold: u32) -> Self {
        Self {
            inner,
            alive: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Probe the wrapped backend once and update the cached flag.
    pub async fn refresh(&self) -> bool {
        if self.inner.is_alive().await {
            self.mark_success();
        } else {
            self.mark_failed();
        }
        self.alive.load(Ordering::Acquire)
    }

    fn mark_failed(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures >= self.failure_threshold && self.alive.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                backend = self.display_name(),
                failures,
                "Backend marked as down"
            );
        }
    }

    fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);

        if !self.alive.swap(true, Ordering::AcqRel) {
            tracing::info!(backend = self.display_name(), "Backend recovered");
        }
    }
}

#[async_trait]
impl Backend for CachedBackend {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn forward(&self, request: &Request) -> Result<Response, ProxyError> {
        self.inner.forward(request).await
    }
}

/// Periodically refreshes a set of cached backends
pub struct HealthMonitor {
    backends: Vec<Arc<CachedBackend>>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(backends: Vec<Arc<CachedBackend>>, interval: Duration) -> Self {
        Self { backends, interval }
    }

    /// Run until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = interval.tick() => self.check_all().await,
                    _ = shutdown.changed() => break,
                }
            }

            tracing::debug!("Health monitor stopped");
        })
    }

    /// Probe every backend in parallel and wait for all of them.
    pub async fn check_all(&self) {
        let mut checks = JoinSet::new();
        for backend in &self.backends {
            let backend = Arc::clone(backend);
            checks.spawn(async move { backend.refresh().await });
        }

        let mut live = 0;
        while let Some(result) = checks.join_next().await {
            if matches!(result, Ok(true)) {
                live += 1;
            }
        }

        tracing::debug!(live, total = self.backends.len(), "Health check round complete");
    }
}
