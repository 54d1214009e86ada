//! Result types reported by the coordinator.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// The peer answered `200`.
    Migrated,
    /// The peer answered `409`: another actor already triggered it.
    AlreadyMigrated,
    Failed,
}

/// Outcome of driving `/migrate` on one peer, retries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMigrationOutcome {
    pub peer: String,
    pub status: PeerStatus,
    /// Set only when `status` is [`PeerStatus::Failed`].
    pub error: Option<String>,
}

impl PeerMigrationOutcome {
    pub fn migrated(peer: &str) -> Self {
        Self {
            peer: peer.to_string(),
            status: PeerStatus::Migrated,
            error: None,
        }
    }

    pub fn already_migrated(peer: &str) -> Self {
        Self {
            peer: peer.to_string(),
            status: PeerStatus::AlreadyMigrated,
            error: None,
        }
    }

    pub fn failed(peer: &str, error: impl Into<String>) -> Self {
        Self {
            peer: peer.to_string(),
            status: PeerStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == PeerStatus::Failed
    }
}

/// Aggregate of the fan-out step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMigrationResult {
    pub outcomes: Vec<PeerMigrationOutcome>,
}

impl ClusterMigrationResult {
    pub fn record(&mut self, outcome: PeerMigrationOutcome) {
        self.outcomes.push(outcome);
    }

    /// True when no peer ended in a non-conflict failure.
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(PeerMigrationOutcome::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PeerMigrationOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn outcome(&self, peer: &str) -> Option<&PeerMigrationOutcome> {
        self.outcomes.iter().find(|o| o.peer == peer)
    }
}

impl fmt::Display for ClusterMigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<_> = self.failures().collect();
        write!(f, "{} of {} peers failed", failed.len(), self.outcomes.len())?;
        for outcome in failed {
            write!(
                f,
                "; {}: {}",
                outcome.peer,
                outcome.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// How a successful coordinator run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutoverOutcome {
    /// No peers configured; nothing to coordinate.
    SingleInstance,
    /// The local broker already runs the target major.
    AlreadyOnTarget { major: u32 },
    /// The bootstrap peer answered `409`; another actor owns the cutover.
    BootstrapConflict { bootstrap: String },
    /// Bootstrap migrated and every other peer was driven.
    Migrated {
        bootstrap: String,
        result: ClusterMigrationResult,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_do_not_fail_the_result() {
        let mut result = ClusterMigrationResult::default();
        result.record(PeerMigrationOutcome::migrated("a:1"));
        result.record(PeerMigrationOutcome::already_migrated("b:1"));
        assert!(result.is_success());

        result.record(PeerMigrationOutcome::failed("c:1", "connection refused"));
        assert!(!result.is_success());
        assert_eq!(result.failures().count(), 1);
        assert_eq!(
            result.to_string(),
            "1 of 3 peers failed; c:1: connection refused"
        );
    }

    #[test]
    fn empty_result_is_success() {
        assert!(ClusterMigrationResult::default().is_success());
    }
}
