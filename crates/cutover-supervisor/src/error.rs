//! Supervisor error types.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the supervisor loop.
///
/// Cloneable so the same failure can be both replied to a migration
/// requester and returned from [`Supervisor::run`](crate::Supervisor::run).
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("failed to launch broker {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("broker exited with status {code}")]
    Exited { code: i32 },

    #[error("failed to deliver signal {signal} to broker pid {pid}: {source}")]
    Signal {
        signal: &'static str,
        pid: i32,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("supervisor is not running")]
    Unavailable,
}
