//! The cutover algorithm.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use cutover_core::NodeConfig;
use cutover_probe::BrokerProbe;

use crate::error::CoordinatorError;
use crate::outcome::{ClusterMigrationResult, CutoverOutcome, PeerMigrationOutcome, PeerStatus};
use crate::peer::{Discovery, PeerClient, RetryPolicy, discover, migrate_peer};

/// Inputs of one coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Handshake endpoint of the broker on this node.
    pub local_broker: String,
    /// Control-plane endpoints of every peer, in configured order.
    pub peers: Vec<String>,
    pub target_major: u32,
    pub retry: RetryPolicy,
}

impl CoordinatorSettings {
    pub fn from_node(config: &NodeConfig) -> Self {
        Self {
            local_broker: config.local_broker_addr(),
            peers: config.control_addrs(),
            target_major: config.target_major_version,
            retry: RetryPolicy::from(&config.peer_calls),
        }
    }
}

pub struct Coordinator<P, C> {
    settings: CoordinatorSettings,
    probe: P,
    client: Arc<C>,
}

impl<P, C> Coordinator<P, C>
where
    P: BrokerProbe,
    C: PeerClient + 'static,
{
    pub fn new(settings: CoordinatorSettings, probe: P, client: C) -> Self {
        Self {
            settings,
            probe,
            client: Arc::new(client),
        }
    }

    /// Run the cutover once. `Err` means the deploy step must fail.
    pub async fn run(&self) -> Result<CutoverOutcome, CoordinatorError> {
        if self.settings.peers.is_empty() {
            info!("no peers configured, nothing to coordinate");
            return Ok(CutoverOutcome::SingleInstance);
        }

        let local = &self.settings.local_broker;
        let major = self
            .probe
            .major_version(local)
            .await
            .map_err(CoordinatorError::LocalProbe)?;
        if major >= self.settings.target_major {
            info!(%local, major, "local broker already on target major");
            return Ok(CutoverOutcome::AlreadyOnTarget { major });
        }
        info!(%local, major, target = self.settings.target_major, "cutover required");

        let bootstrap = self.find_bootstrap().await?;

        let reply = migrate_peer(self.client.as_ref(), &bootstrap, self.settings.retry).await;
        match reply.status {
            PeerStatus::Migrated => info!(peer = %bootstrap, "bootstrap peer migrated"),
            PeerStatus::AlreadyMigrated => {
                info!(peer = %bootstrap, "bootstrap already triggered by another actor");
                return Ok(CutoverOutcome::BootstrapConflict { bootstrap });
            }
            PeerStatus::Failed => {
                let reason = reply.error.unwrap_or_default();
                error!(peer = %bootstrap, %reason, "bootstrap migration failed");
                return Err(CoordinatorError::BootstrapMigrate {
                    peer: bootstrap,
                    reason,
                });
            }
        }

        let result = self.fan_out(&bootstrap).await;
        if result.is_success() {
            info!(peers = result.outcomes.len(), "cluster cutover complete");
            Ok(CutoverOutcome::Migrated { bootstrap, result })
        } else {
            error!(%result, "cluster cutover incomplete");
            Err(CoordinatorError::PartialFailure(result))
        }
    }

    /// Ask every peer for `/info` and return the first bootstrap in
    /// configured order.
    async fn find_bootstrap(&self) -> Result<String, CoordinatorError> {
        let mut bootstrap: Option<&String> = None;
        for peer in &self.settings.peers {
            match discover(self.client.as_ref(), peer, self.settings.retry).await {
                Discovery::Answered(info) if info.bootstrap => match bootstrap {
                    None => {
                        info!(%peer, "found bootstrap peer");
                        bootstrap = Some(peer);
                    }
                    Some(first) => {
                        warn!(%peer, using = %first, "multiple peers claim bootstrap");
                    }
                },
                Discovery::Answered(_) => {}
                Discovery::Unreachable(e) => {
                    warn!(%peer, error = %e, "peer unreachable during discovery, skipping");
                }
                Discovery::Invalid(source) => {
                    return Err(CoordinatorError::PeerProtocol {
                        peer: peer.clone(),
                        source,
                    });
                }
            }
        }
        bootstrap.cloned().ok_or(CoordinatorError::NoBootstrapPeer)
    }

    /// Migrate every non-bootstrap peer concurrently.
    async fn fan_out(&self, bootstrap: &str) -> ClusterMigrationResult {
        let result = Arc::new(Mutex::new(ClusterMigrationResult::default()));
        let mut tasks = JoinSet::new();

        for peer in self.settings.peers.iter().filter(|p| *p != bootstrap) {
            let client = Arc::clone(&self.client);
            let result = Arc::clone(&result);
            let peer = peer.clone();
            let retry = self.settings.retry;
            tasks.spawn(async move {
                let outcome = migrate_peer(client.as_ref(), &peer, retry).await;
                match outcome.status {
                    PeerStatus::Migrated => info!(%peer, "peer migrated"),
                    PeerStatus::AlreadyMigrated => info!(%peer, "peer already migrated"),
                    PeerStatus::Failed => {
                        warn!(%peer, error = ?outcome.error, "peer migration failed")
                    }
                }
                if let Ok(mut result) = result.lock() {
                    result.record(outcome);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "fan-out task aborted");
            }
        }

        let mut result = match result.lock() {
            Ok(result) => result.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        // Peers whose task died without recording count as failed.
        for peer in self.settings.peers.iter().filter(|p| *p != bootstrap) {
            if result.outcome(peer).is_none() {
                result.record(PeerMigrationOutcome::failed(peer, "migration task aborted"));
            }
        }
        result
    }
}
