//! `cutoverd serve`: the long-running per-node process.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::info;

use cutover_control::{ControlServer, ControlState, TlsIdentity, build_router};
use cutover_core::NodeConfig;
use cutover_probe::{ProbeSettings, TcpProbe};
use cutover_supervisor::{HostSignal, Supervisor, SupervisorConfig, select_binary};

use crate::group::OrderedGroup;

pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let identity = TlsIdentity::from_files(&config.ca_file, &config.cert_file, &config.key_file)
        .context("loading control-plane TLS material")?;
    let server_tls = identity.server_config()?;

    // ── Pick the first binary ──────────────────────────────────

    let probe = TcpProbe::new(ProbeSettings::from(&config.probe));
    let initial = select_binary(
        &probe,
        &config.remote_broker_addrs(),
        config.target_major_version,
    )
    .await
    .context("surveying fleet broker versions")?;
    info!(binary = ?initial, "fleet survey complete");

    // ── Assemble members ───────────────────────────────────────

    let (supervisor, handle) = Supervisor::new(SupervisorConfig::from_node(&config, initial));
    let router = build_router(ControlState::new(config.bootstrap, handle.requests()));
    let control_addr = SocketAddr::from(([0, 0, 0, 0], config.control_port));

    let host_signals = forward_host_signals()?;

    OrderedGroup::new()
        .member("broker", move |signals, ready| async move {
            supervisor.run(signals, ready).await?;
            Ok(())
        })
        .member("control-plane", move |mut signals, ready| async move {
            let server = ControlServer::bind(control_addr, server_tls, router)
                .await
                .with_context(|| format!("binding control plane on {control_addr}"))?;
            let _ = ready.send(());
            server
                .serve(async move {
                    // SIGHUP only reloads the broker.
                    while let Some(signal) = signals.recv().await {
                        if signal.is_terminating() {
                            break;
                        }
                    }
                })
                .await?;
            Ok(())
        })
        .run(host_signals)
        .await
}

/// Relay SIGINT, SIGTERM and SIGHUP into the group.
fn forward_host_signals() -> anyhow::Result<mpsc::Receiver<HostSignal>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => HostSignal::Interrupt,
                Some(()) = terminate.recv() => HostSignal::Terminate,
                Some(()) = hangup.recv() => HostSignal::Hangup,
                else => break,
            };
            info!(signal = %received, "host signal received");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
