//! Control-plane handlers.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use cutover_supervisor::{MigrationRequest, SupervisorError};

use crate::ControlState;

/// Body of `GET /info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerInfo {
    pub bootstrap: bool,
}

/// Result of asking the gate to migrate.
#[derive(Debug)]
pub enum TriggerOutcome {
    Migrated,
    AlreadyTriggered,
    Failed(SupervisorError),
}

/// At-most-once migration trigger.
///
/// The lock is held across the whole handoff to the supervisor, so every
/// `/migrate` call on a node collapses into one logical attempt.
pub struct MigrationGate {
    triggered: Mutex<bool>,
    requests: mpsc::Sender<MigrationRequest>,
}

impl MigrationGate {
    pub fn new(requests: mpsc::Sender<MigrationRequest>) -> Self {
        Self {
            triggered: Mutex::new(false),
            requests,
        }
    }

    pub async fn trigger(&self) -> TriggerOutcome {
        let mut triggered = self.triggered.lock().await;
        if *triggered {
            return TriggerOutcome::AlreadyTriggered;
        }
        // Never reset: a failed attempt is not retried by this node.
        *triggered = true;

        let (request, reply) = MigrationRequest::channel();
        if self.requests.send(request).await.is_err() {
            return TriggerOutcome::Failed(SupervisorError::Unavailable);
        }
        match reply.await {
            Ok(Ok(())) => TriggerOutcome::Migrated,
            Ok(Err(e)) => TriggerOutcome::Failed(e),
            Err(_) => TriggerOutcome::Failed(SupervisorError::Unavailable),
        }
    }

    pub async fn is_triggered(&self) -> bool {
        *self.triggered.lock().await
    }
}

/// GET /info
pub async fn info(State(state): State<ControlState>) -> Response {
    match serde_json::to_vec(&PeerInfo {
        bootstrap: state.bootstrap,
    }) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode info response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /migrate
pub async fn migrate(State(state): State<ControlState>) -> StatusCode {
    info!("received migrate call");
    match state.migration.trigger().await {
        TriggerOutcome::Migrated => {
            info!("local broker migrated");
            StatusCode::OK
        }
        TriggerOutcome::AlreadyTriggered => {
            warn!("migration already triggered on this node");
            StatusCode::CONFLICT
        }
        TriggerOutcome::Failed(e) => {
            error!(error = %e, "migration failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Supervisor stand-in answering every request with `result`.
    fn fake_supervisor(
        result: Result<(), SupervisorError>,
    ) -> (mpsc::Sender<MigrationRequest>, tokio::task::JoinHandle<u32>) {
        let (tx, mut rx) = mpsc::channel::<MigrationRequest>(1);
        let handle = tokio::spawn(async move {
            let mut served = 0;
            while let Some(request) = rx.recv().await {
                served += 1;
                let _ = request.reply.send(result.clone());
            }
            served
        });
        (tx, handle)
    }

    #[tokio::test]
    async fn second_trigger_conflicts() {
        let (tx, supervisor) = fake_supervisor(Ok(()));
        let gate = MigrationGate::new(tx);

        assert!(matches!(gate.trigger().await, TriggerOutcome::Migrated));
        assert!(matches!(gate.trigger().await, TriggerOutcome::AlreadyTriggered));
        assert!(gate.is_triggered().await);

        drop(gate);
        assert_eq!(supervisor.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_flag_set() {
        let (tx, _supervisor) = fake_supervisor(Err(SupervisorError::Exited { code: 1 }));
        let gate = MigrationGate::new(tx);

        assert!(matches!(gate.trigger().await, TriggerOutcome::Failed(_)));
        assert!(matches!(gate.trigger().await, TriggerOutcome::AlreadyTriggered));
    }

    #[tokio::test]
    async fn missing_supervisor_fails() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let gate = MigrationGate::new(tx);
        assert!(matches!(
            gate.trigger().await,
            TriggerOutcome::Failed(SupervisorError::Unavailable)
        ));
    }
}
