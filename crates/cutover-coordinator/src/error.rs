use thiserror::Error;

use cutover_control::ClientError;
use cutover_probe::ProbeError;

use crate::outcome::ClusterMigrationResult;

/// Fatal coordinator failures. Every variant maps to exit status 1.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("local broker probe failed: {0}")]
    LocalProbe(#[source] ProbeError),

    #[error("peer {peer} answered /info with an invalid response: {source}")]
    PeerProtocol {
        peer: String,
        #[source]
        source: ClientError,
    },

    #[error("no peer reported itself as bootstrap")]
    NoBootstrapPeer,

    #[error("bootstrap peer {peer} failed to migrate: {reason}")]
    BootstrapMigrate { peer: String, reason: String },

    #[error("cluster migration incomplete: {0}")]
    PartialFailure(ClusterMigrationResult),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("local broker probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("bootstrap broker still on major {actual}, expected {expected}")]
    StillOld { actual: u32, expected: u32 },
}
