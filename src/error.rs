//! Per-request proxy failures
//!
//! Startup paths use `anyhow`; anything that can go wrong while serving a
//! single request is a [`ProxyError`] and always turns into a response.

use std::io;

use thiserror::Error;

use crate::http::response::{Response, StatusCode};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no backend available after {attempts} selection attempts")]
    NoBackendAvailable { attempts: usize },

    #[error("timed out connecting to {origin}")]
    ConnectTimeout { origin: String },

    #[error("timed out waiting for a response from {origin}")]
    ResponseTimeout { origin: String },

    #[error("failed to connect to {origin}: {source}")]
    Connect {
        origin: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {origin} failed mid-request: {source}")]
    Upstream {
        origin: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed response from {origin}: {reason}")]
    MalformedResponse { origin: String, reason: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::ConnectTimeout { .. } | ProxyError::ResponseTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ProxyError::Connect { .. }
            | ProxyError::Upstream { .. }
            | ProxyError::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// The response sent to the caller in place of the backend's.
    pub fn to_response(&self) -> Response {
        let message = match self {
            ProxyError::NoBackendAvailable { .. } => "No backend servers are available.",
            ProxyError::ConnectTimeout { .. } | ProxyError::ResponseTimeout { .. } => {
                "The backend server did not respond in time."
            }
            _ => "Failed to relay the request to the backend server.",
        };
        Response::text(self.status(), message)
    }
}
