//! Reverse proxy functionality
//!
//! This module implements the core reverse proxy logic: the backend
//! capability trait, round-robin dispatch, request forwarding and optional
//! background health tracking.

pub mod backend;
pub mod balancer;
pub mod health;
pub mod upstream;

pub use backend::{Backend, SimpleBackend};
pub use balancer::LoadBalancer;
pub use health::{CachedBackend, HealthMonitor};
pub use upstream::{Forwarder, Timeouts};

use crate::config::{Config, HealthMode};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Everything built from the backend section of the configuration
pub struct Pool {
    pub balancer: Arc<LoadBalancer>,

    /// Present in background health mode; must be spawned by the caller
    pub monitor: Option<HealthMonitor>,
}

/// Build the backend pool and balancer. Any bad backend aborts startup.
pub fn build_pool(config: &Config) -> Result<Pool> {
    let timeouts = Timeouts::from_config(config);

    let simple = config
        .backends
        .iter()
        .map(|backend| {
            SimpleBackend::new(backend, timeouts)
                .map(|b| b.with_health_path(config.health.path.clone()))
                .with_context(|| format!("invalid backend '{}'", backend.url))
        })
        .collect::<Result<Vec<_>>>()?;

    let (backends, monitor): (Vec<Arc<dyn Backend>>, _) = match config.health.mode {
        HealthMode::OnDemand => (
            simple
                .into_iter()
                .map(|b| Arc::new(b) as Arc<dyn Backend>)
                .collect(),
            None,
        ),
        HealthMode::Background => {
            let cached: Vec<Arc<CachedBackend>> = simple
                .into_iter()
                .map(|b| Arc::new(CachedBackend::new(Arc::new(b), config.health.failure_threshold)))
                .collect();
            let monitor = HealthMonitor::new(
                cached.clone(),
                Duration::from_millis(config.health.interval_ms),
            );
            (
                cached.into_iter().map(|b| b as Arc<dyn Backend>).collect(),
                Some(monitor),
            )
        }
    };

    let balancer = LoadBalancer::new(backends)?.with_rotation_rounds(config.proxy.rotation_rounds);

    Ok(Pool {
        balancer: Arc::new(balancer),
        monitor,
    })
}
