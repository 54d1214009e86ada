//! cutover-core — shared configuration for the cutover daemon and
//! coordinator.
//!
//! Every component receives its settings explicitly from a [`NodeConfig`]
//! loaded once at process start. Nothing reads configuration from global
//! state.

pub mod config;

pub use config::{ConfigError, NodeConfig, PeerCallConfig, ProbeConfig};
