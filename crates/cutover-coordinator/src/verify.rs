//! Post-deploy verification.
//!
//! Runs on every node once the deploy finished. Only the bootstrap node
//! checks anything: if its broker is still below the target major the
//! cutover never happened and the deploy must be failed.

use tracing::{error, info};

use cutover_probe::BrokerProbe;

use crate::error::VerifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Not the bootstrap node.
    Skipped,
    Verified { major: u32 },
}

pub async fn verify<P: BrokerProbe>(
    probe: &P,
    bootstrap: bool,
    local_broker: &str,
    target_major: u32,
) -> Result<VerifyOutcome, VerifyError> {
    if !bootstrap {
        info!("not the bootstrap node, skipping verification");
        return Ok(VerifyOutcome::Skipped);
    }

    let major = probe.major_version(local_broker).await?;
    if major < target_major {
        error!(%local_broker, major, target_major, "bootstrap broker was not migrated");
        return Err(VerifyError::StillOld {
            actual: major,
            expected: target_major,
        });
    }
    info!(%local_broker, major, "bootstrap broker verified");
    Ok(VerifyOutcome::Verified { major })
}
