//! cutover-control — the per-node control plane.
//!
//! # Routes
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | GET | `/info` | `200 {"bootstrap": bool}` |
//! | POST | `/migrate` | `200` migrated, `409` already triggered, `500` failed |
//!
//! Both are served over mutually-authenticated TLS. `/migrate` hands off
//! to the local supervisor at most once per process lifetime; every later
//! or concurrent call gets `409`.
//!
//! [`ControlClient`] is the matching client used by the coordinator.

pub mod client;
pub mod handlers;
pub mod server;
pub mod tls;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::mpsc;

use cutover_supervisor::MigrationRequest;

pub use client::{ClientError, ControlClient, MigrateReply};
pub use handlers::{MigrationGate, PeerInfo, TriggerOutcome};
pub use server::ControlServer;
pub use tls::{ClusterCa, CertKeyPair, TlsError, TlsIdentity};

/// Shared state for control-plane handlers.
#[derive(Clone)]
pub struct ControlState {
    pub bootstrap: bool,
    pub migration: Arc<MigrationGate>,
}

impl ControlState {
    pub fn new(bootstrap: bool, requests: mpsc::Sender<MigrationRequest>) -> Self {
        Self {
            bootstrap,
            migration: Arc::new(MigrationGate::new(requests)),
        }
    }
}

/// Build the control-plane router.
pub fn build_router(state: ControlState) -> Router {
    Router::new()
        .route("/info", get(handlers::info))
        .route("/migrate", post(handlers::migrate))
        .with_state(state)
}
