//! Supervisor control loop: drives the broker state machine.
//!
//! ```text
//! Starting → Running ─┬─ migration request → MigrationRequested → Draining → Running[new]
//!                     ├─ SIGHUP            → forwarded, stays Running
//!                     ├─ host signal       → SignalReceived → Stopped
//!                     └─ broker exit       → ProcessExited → Stopped | Failed
//! ```
//!
//! All `BrokerSession` mutation happens inside [`Supervisor::run`]; the
//! control plane talks to it only through [`MigrationRequest`] messages.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use cutover_core::NodeConfig;

use crate::error::SupervisorError;
use crate::session::{BrokerBinary, BrokerSession};
use crate::signal::HostSignal;

/// Observable supervisor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    /// `generation` counts broker launches, starting at 1.
    Running { binary: BrokerBinary, generation: u32 },
    MigrationRequested,
    Draining,
    SignalReceived,
    ProcessExited { code: i32 },
    Stopped,
    Failed { reason: String },
}

/// A request to swap the broker onto the new binary.
///
/// Consumed exactly once by the supervisor loop, which answers on `reply`.
#[derive(Debug)]
pub struct MigrationRequest {
    pub reply: oneshot::Sender<Result<(), SupervisorError>>,
}

impl MigrationRequest {
    pub fn channel() -> (Self, oneshot::Receiver<Result<(), SupervisorError>>) {
        let (reply, rx) = oneshot::channel();
        (Self { reply }, rx)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Binary for the first launch, from the fleet survey.
    pub initial: BrokerBinary,
    pub old_bin: PathBuf,
    pub new_bin: PathBuf,
    pub broker_config_path: PathBuf,
    /// Wait after each of SIGINT and SIGKILL during a swap.
    pub shutdown_grace: Duration,
}

impl SupervisorConfig {
    pub fn from_node(config: &NodeConfig, initial: BrokerBinary) -> Self {
        Self {
            initial,
            old_bin: config.old_broker_bin.clone(),
            new_bin: config.new_broker_bin.clone(),
            broker_config_path: config.broker_config_path.clone(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    fn path_for(&self, binary: BrokerBinary) -> &PathBuf {
        match binary {
            BrokerBinary::Old => &self.old_bin,
            BrokerBinary::New => &self.new_bin,
        }
    }
}

/// Cloneable handle for talking to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    requests: mpsc::Sender<MigrationRequest>,
    state: watch::Receiver<SupervisorState>,
}

impl SupervisorHandle {
    /// Sender the control plane uses to hand off migration requests.
    pub fn requests(&self) -> mpsc::Sender<MigrationRequest> {
        self.requests.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Request a migration and wait for the supervisor's answer.
    pub async fn migrate(&self) -> Result<(), SupervisorError> {
        let (request, reply) = MigrationRequest::channel();
        self.requests
            .send(request)
            .await
            .map_err(|_| SupervisorError::Unavailable)?;
        reply.await.map_err(|_| SupervisorError::Unavailable)?
    }
}

/// The broker supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    requests: mpsc::Receiver<MigrationRequest>,
    state: watch::Sender<SupervisorState>,
    generation: u32,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> (Self, SupervisorHandle) {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(SupervisorState::Starting);

        let supervisor = Self {
            config,
            requests: request_rx,
            state: state_tx,
            generation: 0,
        };
        let handle = SupervisorHandle {
            requests: request_tx,
            state: state_rx,
        };
        (supervisor, handle)
    }

    /// Launch the broker, signal `ready`, then serve events until the
    /// broker exits or a host signal is forwarded.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<HostSignal>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), SupervisorError> {
        let mut session = match self.launch(self.config.initial) {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e)),
        };
        let _ = ready.send(());

        let mut requests_open = true;
        let mut signals_open = true;

        loop {
            tokio::select! {
                request = self.requests.recv(), if requests_open => {
                    let Some(request) = request else {
                        requests_open = false;
                        continue;
                    };
                    info!("received migration request");
                    match self.migrate(&mut session).await {
                        Ok(()) => {
                            let _ = request.reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = request.reply.send(Err(e.clone()));
                            return Err(self.fail(e));
                        }
                    }
                }
                signal = signals.recv(), if signals_open => {
                    let Some(signal) = signal else {
                        signals_open = false;
                        continue;
                    };
                    if !signal.is_terminating() {
                        info!(%signal, pid = session.pid(), "forwarding signal to broker, still supervising");
                        session.signal(signal)?;
                        continue;
                    }
                    self.set_state(SupervisorState::SignalReceived);
                    info!(%signal, pid = session.pid(), "forwarding signal to broker");
                    session.signal(signal)?;
                    self.set_state(SupervisorState::Stopped);
                    return Ok(());
                }
                code = session.wait_exit() => {
                    self.set_state(SupervisorState::ProcessExited { code });
                    info!(code, pid = session.pid(), "broker exited");
                    if code == 0 {
                        self.set_state(SupervisorState::Stopped);
                        return Ok(());
                    }
                    return Err(self.fail(SupervisorError::Exited { code }));
                }
            }
        }
    }

    /// Swap the current session onto the new binary.
    async fn migrate(&mut self, session: &mut BrokerSession) -> Result<(), SupervisorError> {
        if session.binary() == BrokerBinary::New {
            info!("broker already on new binary, skipping migration");
            return Ok(());
        }

        self.set_state(SupervisorState::MigrationRequested);
        self.set_state(SupervisorState::Draining);
        if session.shutdown(self.config.shutdown_grace).await.is_none() {
            warn!(pid = session.pid(), "old broker did not confirm exit, starting new binary anyway");
        }

        *session = self.launch(BrokerBinary::New)?;
        info!(pid = session.pid(), "migrated broker to new binary");
        Ok(())
    }

    fn launch(&mut self, binary: BrokerBinary) -> Result<BrokerSession, SupervisorError> {
        let session = BrokerSession::launch(
            binary,
            self.config.path_for(binary),
            &self.config.broker_config_path,
        )?;
        self.generation += 1;
        self.set_state(SupervisorState::Running {
            binary,
            generation: self.generation,
        });
        Ok(session)
    }

    fn fail(&self, e: SupervisorError) -> SupervisorError {
        error!(error = %e, "supervisor failed");
        self.set_state(SupervisorState::Failed {
            reason: e.to_string(),
        });
        e
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }
}
