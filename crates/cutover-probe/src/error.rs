//! Probe error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not connect to broker at {address} within {budget:?}: {source}")]
    Connect {
        address: String,
        budget: Duration,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading handshake from {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable handshake banner: {0}")]
    Banner(String),

    #[error("malformed broker version {0:?}")]
    MalformedVersion(String),
}

impl ProbeError {
    /// Whether the failure is about reachability rather than content.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Connect { .. } | ProbeError::Io { .. })
    }
}
