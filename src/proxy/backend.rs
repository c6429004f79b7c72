//! Backend servers
//!
//! A backend is anything that can name itself, answer whether it is live
//! and relay a request. The load balancer only talks to this trait.

use crate::config::{BackendConfig, parse_origin};
use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::proxy::upstream::{Forwarder, Timeouts};
use anyhow::Result;
use async_trait::async_trait;

/// Capability set of a proxy target
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable origin address (e.g., "http://localhost:3000")
    fn address(&self) -> &str;

    /// Name used in logs, the address unless configured otherwise
    fn display_name(&self) -> &str {
        self.address()
    }

    /// Current liveness. Implementations decide whether this probes.
    async fn is_alive(&self) -> bool;

    /// Relay `request` and return the backend's response.
    async fn forward(&self, request: &Request) -> Result<Response, ProxyError>;
}

/// A backend reached directly over HTTP, probed on every liveness query
#[derive(Debug)]
pub struct SimpleBackend {
    address: String,
    name: Option<String>,
    health_path: String,
    forwarder: Forwarder,
}

impl SimpleBackend {
    /// Create a backend from configuration.
    ///
    /// Fails if the address is not a usable origin.
    pub fn new(config: &BackendConfig, timeouts: Timeouts) -> Result<Self> {
        let origin = parse_origin(&config.url)?;

        Ok(Self {
            address: config.url.clone(),
            name: config.name.clone(),
            health_path: "/".to_string(),
            forwarder: Forwarder::new(origin, timeouts),
        })
    }

    /// Probe `path` instead of the bare origin.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }
}

#[async_trait]
impl Backend for SimpleBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Only an exact 200 counts as live.
    async fn is_alive(&self) -> bool {
        match self.forwarder.probe(&self.health_path).await {
            Ok(status) if status == StatusCode::OK => true,
            Ok(status) => {
                tracing::debug!(
                    backend = self.display_name(),
                    status = status.as_u16(),
                    "Liveness probe returned non-200"
                );
                false
            }
            Err(e) => {
                tracing::debug!(backend = self.display_name(), error = %e, "Liveness probe failed");
                false
            }
        }
    }

    async fn forward(&self, request: &Request) -> Result<Response, ProxyError> {
        self.forwarder.forward(request).await
    }
}
