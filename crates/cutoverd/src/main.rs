//! cutoverd — rolling major-version cutover for a broker fleet.
//!
//! One binary, three commands, all driven by the same node config file:
//!
//! - `serve` runs on every node for its whole lifetime: it supervises the
//!   local broker and exposes the mTLS control plane.
//! - `migrate` runs once per node at deploy time and coordinates the
//!   cluster-wide cutover through the peers' control planes.
//! - `verify` runs after the deploy and fails it if the bootstrap node's
//!   broker never reached the target major version.
//!
//! # Usage
//!
//! ```text
//! cutoverd serve   --config-file /etc/cutover/node.json
//! cutoverd migrate --config-file /etc/cutover/node.json
//! cutoverd verify  --config-file /etc/cutover/node.json
//! ```
//!
//! Exit status is 0 on success or no-op and 1 on any fatal condition.

mod group;
mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use cutover_control::{ControlClient, TlsIdentity};
use cutover_coordinator::{Coordinator, CoordinatorSettings, CutoverOutcome};
use cutover_core::NodeConfig;
use cutover_probe::{ProbeSettings, TcpProbe};

#[derive(Parser)]
#[command(name = "cutoverd", about = "Broker fleet cutover daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise the local broker and serve the control plane.
    Serve {
        /// Path to the node config file.
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Drive the cluster-wide cutover from this node.
    Migrate {
        /// Path to the node config file.
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Fail if the bootstrap broker is still on the old major version.
    Verify {
        /// Path to the node config file.
        #[arg(long)]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cutover=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config_file } => serve::run(load(&config_file)?).await,
        Command::Migrate { config_file } => run_migrate(load(&config_file)?).await,
        Command::Verify { config_file } => run_verify(load(&config_file)?).await,
    }
}

fn load(path: &Path) -> anyhow::Result<NodeConfig> {
    let config = NodeConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    info!(address = %config.address, peers = config.peers.len(), bootstrap = config.bootstrap, "config loaded");
    Ok(config)
}

async fn run_migrate(config: NodeConfig) -> anyhow::Result<()> {
    let settings = CoordinatorSettings::from_node(&config);
    let probe = TcpProbe::new(ProbeSettings::from(&config.probe));

    // A single-instance node may not carry TLS material at all.
    let outcome = if config.peers.is_empty() {
        CutoverOutcome::SingleInstance
    } else {
        let identity = TlsIdentity::from_files(&config.ca_file, &config.cert_file, &config.key_file)
            .context("loading control-plane TLS material")?;
        let client = ControlClient::new(identity.client_config()?, config.peer_calls.timeout());
        Coordinator::new(settings, probe, client).run().await?
    };

    match outcome {
        CutoverOutcome::SingleInstance => info!("single-instance deployment, nothing to do"),
        CutoverOutcome::AlreadyOnTarget { major } => info!(major, "already on target version"),
        CutoverOutcome::BootstrapConflict { bootstrap } => {
            info!(%bootstrap, "cutover already driven by another node")
        }
        CutoverOutcome::Migrated { bootstrap, result } => {
            info!(%bootstrap, peers = result.outcomes.len(), "cluster cutover complete")
        }
    }
    Ok(())
}

async fn run_verify(config: NodeConfig) -> anyhow::Result<()> {
    let probe = TcpProbe::new(ProbeSettings::from(&config.probe));
    let outcome = cutover_coordinator::verify(
        &probe,
        config.bootstrap,
        &config.local_broker_addr(),
        config.target_major_version,
    )
    .await?;
    info!(?outcome, "verification finished");
    Ok(())
}
