//! Node configuration file parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading a node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Immutable per-node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's address, as it appears in `peers`.
    pub address: String,
    /// Whether this node is the designated bootstrap peer.
    #[serde(default)]
    pub bootstrap: bool,
    pub broker_port: u16,
    pub control_port: u16,
    /// Every node in the cluster (hosts only, ports come from above).
    #[serde(default)]
    pub peers: Vec<String>,
    pub old_broker_bin: PathBuf,
    pub new_broker_bin: PathBuf,
    pub broker_config_path: PathBuf,
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    #[serde(default = "default_target_major")]
    pub target_major_version: u32,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub peer_calls: PeerCallConfig,
}

/// Broker handshake probe timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// Total wall-clock budget across all connect attempts.
    pub budget_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 6_000,
            retry_interval_ms: 1_000,
            budget_ms: 20_000,
        }
    }
}

/// Retry settings for control-plane calls made to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerCallConfig {
    pub attempts: u32,
    pub delay_ms: u64,
    /// Per-request timeout. Must cover a full broker swap on the peer.
    pub timeout_ms: u64,
}

impl Default for PeerCallConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

fn default_target_major() -> u32 {
    2
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

impl NodeConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot possibly drive a node.
    ///
    /// An empty peer list is valid: it marks a single-instance deployment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must be set".to_string()));
        }
        if self.broker_port == 0 || self.control_port == 0 {
            return Err(ConfigError::Invalid(
                "broker_port and control_port must be non-zero".to_string(),
            ));
        }
        for (name, path) in [
            ("old_broker_bin", &self.old_broker_bin),
            ("new_broker_bin", &self.new_broker_bin),
            ("broker_config_path", &self.broker_config_path),
            ("ca_file", &self.ca_file),
            ("cert_file", &self.cert_file),
            ("key_file", &self.key_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must be set")));
            }
        }
        if let Some(peer) = self.peers.iter().find(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("empty peer entry: {peer:?}")));
        }
        if self.peer_calls.attempts == 0 {
            return Err(ConfigError::Invalid(
                "peer_calls.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The local broker's handshake endpoint.
    pub fn local_broker_addr(&self) -> String {
        format!("{}:{}", self.address, self.broker_port)
    }

    /// Broker endpoints of every peer except this node.
    pub fn remote_broker_addrs(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|peer| **peer != self.address)
            .map(|peer| format!("{peer}:{}", self.broker_port))
            .collect()
    }

    /// Control-plane endpoints of every configured peer, in config order.
    pub fn control_addrs(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|peer| format!("{peer}:{}", self.control_port))
            .collect()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

impl PeerCallConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
