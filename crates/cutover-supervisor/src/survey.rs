//! Fleet version survey: picks the binary for the first broker launch.
//!
//! A node joining a fleet that still runs old-major brokers must start on
//! the old binary so it can cluster with them; the coordinator moves it
//! forward later. Only a fleet with no reachable old-major broker starts
//! straight on the new binary.

use tracing::{info, warn};

use cutover_probe::{BrokerProbe, ProbeError};

use crate::session::BrokerBinary;

/// Survey `remote_brokers` (the local node excluded) and choose a binary.
///
/// Unreachable brokers are skipped; a broker answering with a malformed
/// version aborts the survey.
pub async fn select_binary<P: BrokerProbe>(
    probe: &P,
    remote_brokers: &[String],
    target_major: u32,
) -> Result<BrokerBinary, ProbeError> {
    if remote_brokers.is_empty() {
        info!("single-instance cluster, starting on new binary");
        return Ok(BrokerBinary::New);
    }

    for address in remote_brokers {
        match probe.major_version(address).await {
            Ok(major) if major < target_major => {
                info!(%address, major, "found old-major broker, starting on old binary");
                return Ok(BrokerBinary::Old);
            }
            Ok(major) => {
                info!(%address, major, "broker already on target major");
            }
            Err(e) if e.is_retryable() => {
                warn!(%address, error = %e, "ignoring unreachable broker");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(BrokerBinary::New)
}
