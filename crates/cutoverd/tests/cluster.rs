//! In-process cluster: real supervisors, real mTLS control planes and the
//! real coordinator client, with sleeping shell scripts standing in for the
//! broker binaries.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use cutover_control::{ClusterCa, ControlClient, ControlServer, ControlState, build_router};
use cutover_coordinator::{Coordinator, CoordinatorSettings, CutoverOutcome, RetryPolicy};
use cutover_probe::{BrokerProbe, ProbeError};
use cutover_supervisor::{
    BrokerBinary, HostSignal, Supervisor, SupervisorConfig, SupervisorHandle, SupervisorState,
};

fn script(body: &str) -> tempfile::TempPath {
    let mut file = tempfile::Builder::new()
        .prefix("broker-")
        .suffix(".sh")
        .tempfile()
        .unwrap();
    writeln!(file, "#!/bin/sh\n{body}").unwrap();
    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Local broker still on the old major.
struct OldBroker;

impl BrokerProbe for OldBroker {
    async fn major_version(&self, _address: &str) -> Result<u32, ProbeError> {
        Ok(1)
    }
}

struct Node {
    control_addr: String,
    supervisor: SupervisorHandle,
    signals: mpsc::Sender<HostSignal>,
    _stop: oneshot::Sender<()>,
}

async fn start_node(ca: &ClusterCa, bootstrap: bool, old: &Path, new: &Path) -> Node {
    let (supervisor, handle) = Supervisor::new(SupervisorConfig {
        initial: BrokerBinary::Old,
        old_bin: old.to_path_buf(),
        new_bin: new.to_path_buf(),
        broker_config_path: PathBuf::from("/dev/null"),
        shutdown_grace: Duration::from_millis(300),
    });
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(supervisor.run(signal_rx, ready_tx));
    ready_rx.await.unwrap();

    let identity = ca.identity("node", &["127.0.0.1".to_string()]).unwrap();
    let router = build_router(ControlState::new(bootstrap, handle.requests()));
    let server = ControlServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        identity.server_config().unwrap(),
        router,
    )
    .await
    .unwrap();
    let control_addr = server.local_addr().unwrap().to_string();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));

    Node {
        control_addr,
        supervisor: handle,
        signals: signal_tx,
        _stop: stop,
    }
}

fn on_new(node: &Node) -> bool {
    matches!(
        node.supervisor.state(),
        SupervisorState::Running {
            binary: BrokerBinary::New,
            generation: 2
        }
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_node_cutover() {
    let old = script("exec sleep 30");
    let new = script("exec sleep 30");

    let ca = ClusterCa::generate().unwrap();
    let nodes = vec![
        start_node(&ca, false, &old, &new).await,
        start_node(&ca, true, &old, &new).await,
        start_node(&ca, false, &old, &new).await,
    ];

    let client_identity = ca.identity("coordinator", &["127.0.0.1".to_string()]).unwrap();
    let client = ControlClient::new(
        client_identity.client_config().unwrap(),
        Duration::from_secs(10),
    );
    let settings = CoordinatorSettings {
        local_broker: "127.0.0.1:4222".to_string(),
        peers: nodes.iter().map(|n| n.control_addr.clone()).collect(),
        target_major: 2,
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(50),
        },
    };

    let coordinator = Coordinator::new(settings.clone(), OldBroker, client.clone());
    let CutoverOutcome::Migrated { bootstrap, result } = coordinator.run().await.unwrap() else {
        panic!("expected a full migration");
    };
    assert_eq!(bootstrap, nodes[1].control_addr);
    assert!(result.is_success());
    assert!(nodes.iter().all(on_new));

    // A second deploy pass finds the bootstrap already triggered.
    let again = Coordinator::new(settings, OldBroker, client).run().await.unwrap();
    assert!(matches!(again, CutoverOutcome::BootstrapConflict { .. }));

    for node in &nodes {
        node.signals.send(HostSignal::Terminate).await.unwrap();
    }
}
