//! Process configuration
//!
//! Configuration is read from a YAML file when one is given, otherwise the
//! built-in defaults apply. The `LISTEN` environment variable always wins
//! over the listen address from the file.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "WAYPOINT_CONFIG";

/// Environment variable overriding the listen address
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backends: Vec<BackendConfig>,
    pub proxy: ProxyConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the inbound listener binds to
    pub listen_addr: String,

    /// How long in-flight connections may run after a shutdown signal
    pub shutdown_grace_ms: u64,
}

/// A single backend origin
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Origin URL (e.g., "http://localhost:3000")
    pub url: String,

    /// Optional backend name for logging
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,

    /// Full passes over the pool a selection may make before giving up
    pub rotation_rounds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthMode {
    /// Probe the backend on every selection attempt
    OnDemand,
    /// Probe periodically in the background and select from the cached result
    Background,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub mode: HealthMode,

    /// Path probed with GET on each backend origin
    pub path: String,
    pub probe_timeout_ms: u64,

    /// Background mode only
    pub interval_ms: u64,

    /// Background mode only: consecutive failed probes before exclusion
    pub failure_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: ["http://localhost:3000", "http://localhost:3001", "http://localhost:3002"]
                .into_iter()
                .map(|url| BackendConfig {
                    url: url.to_string(),
                    name: None,
                })
                .collect(),
            proxy: ProxyConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            shutdown_grace_ms: 10_000,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            rotation_rounds: 1,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            mode: HealthMode::OnDemand,
            path: "/".to_string(),
            probe_timeout_ms: 2_000,
            interval_ms: 5_000,
            failure_threshold: 1,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// The file path comes from the first CLI argument, then `WAYPOINT_CONFIG`.
    pub fn load() -> Result<Self> {
        let path = std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .map(PathBuf::from);
        let listen = std::env::var(LISTEN_ENV).ok();

        Self::load_from(path.as_deref(), listen)
    }

    /// Load from an optional file with an optional listen override, then validate.
    pub fn load_from(path: Option<&Path>, listen_override: Option<String>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file '{}'", path.display()))?;
                Self::from_yaml_str(&text)
                    .with_context(|| format!("invalid config file '{}'", path.display()))?
            }
            None => Self::default(),
        };

        if let Some(listen) = listen_override {
            cfg.server.listen_addr = listen;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("could not parse YAML")
    }

    /// Reject configurations the proxy cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend must be configured");
        }

        for backend in &self.backends {
            parse_origin(&backend.url)?;
        }

        if self.proxy.connect_timeout_ms == 0 || self.proxy.request_timeout_ms == 0 {
            bail!("proxy timeouts must be greater than zero");
        }
        if self.proxy.rotation_rounds == 0 {
            bail!("proxy.rotation_rounds must be at least 1");
        }
        if self.health.probe_timeout_ms == 0 {
            bail!("health.probe_timeout_ms must be greater than zero");
        }
        if self.health.mode == HealthMode::Background {
            if self.health.interval_ms == 0 {
                bail!("health.interval_ms must be greater than zero");
            }
            if self.health.failure_threshold == 0 {
                bail!("health.failure_threshold must be at least 1");
            }
        }
        if !self.health.path.starts_with('/') {
            bail!("health.path must start with '/'");
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_grace_ms)
    }
}

/// Parse an operator-supplied backend address into an origin URL.
pub fn parse_origin(address: &str) -> Result<Url> {
    let url = Url::parse(address).with_context(|| format!("malformed backend address '{}'", address))?;

    if url.scheme() != "http" {
        bail!("backend '{}' uses unsupported scheme '{}'", address, url.scheme());
    }
    if url.host_str().is_none() {
        bail!("backend '{}' has no host", address);
    }
    if url.query().is_some() || url.fragment().is_some() {
        bail!("backend '{}' must not carry a query or fragment", address);
    }

    Ok(url)
}
