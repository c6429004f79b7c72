//! Round-robin dispatch over a fixed backend pool

use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::backend::Backend;
use anyhow::{Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selects backends in rotation, skipping those that are not live
pub struct LoadBalancer {
    backends: Vec<Arc<dyn Backend>>,

    /// Next rotation start. Claimed with `fetch_add`, moved past skipped
    /// backends with `fetch_max`.
    cursor: AtomicUsize,

    /// Full passes over the pool one selection may make
    rotation_rounds: usize,
}

impl LoadBalancer {
    /// Create a balancer over a non-empty pool. Rotation order is pool order.
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Result<Self> {
        if backends.is_empty() {
            bail!("load balancer requires at least one backend");
        }

        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
            rotation_rounds: 1,
        })
    }

    pub fn with_rotation_rounds(mut self, rounds: usize) -> Self {
        self.rotation_rounds = rounds.max(1);
        self
    }

    /// Start the rotation at `position` instead of the first backend.
    pub fn with_cursor(self, position: usize) -> Self {
        self.cursor.store(position, Ordering::Relaxed);
        self
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Upper bound on liveness checks made by one selection
    pub fn max_attempts(&self) -> usize {
        self.backends.len() * self.rotation_rounds
    }

    /// Pick the next live backend in rotation.
    ///
    /// A selection claims one start position with a single `fetch_add` and
    /// walks the pool from there, so every backend is asked at least once
    /// per round no matter how many selections run concurrently. Liveness
    /// is asked afresh on every attempt. After `max_attempts` dead backends
    /// the selection fails.
    pub async fn select_next(&self) -> Result<Arc<dyn Backend>, ProxyError> {
        let attempts = self.max_attempts();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for offset in 0..attempts {
            let position = start.wrapping_add(offset);
            let backend = &self.backends[position % self.backends.len()];

            if backend.is_alive().await {
                // Resume the rotation after the backend just chosen
                if offset > 0 {
                    self.cursor
                        .fetch_max(position.wrapping_add(1), Ordering::Relaxed);
                }
                return Ok(Arc::clone(backend));
            }

            tracing::debug!(backend = backend.display_name(), "Skipping dead backend");
        }

        tracing::error!(attempts, "No live backend found in rotation");
        Err(ProxyError::NoBackendAvailable { attempts })
    }

    /// Select a backend and relay `request` to it.
    pub async fn dispatch(&self, request: &Request) -> Result<Response, ProxyError> {
        let backend = self.select_next().await?;

        tracing::info!(
            backend = backend.address(),
            method = %request.method,
            path = %request.path,
            "Proxying request"
        );

        match backend.forward(request).await {
            Ok(response) => {
                tracing::debug!(
                    backend = backend.display_name(),
                    status = response.status.as_u16(),
                    "Backend responded"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    backend = backend.display_name(),
                    error = %e,
                    method = %request.method,
                    path = %request.path,
                    "Failed to proxy request to backend"
                );
                Err(e)
            }
        }
    }
}
