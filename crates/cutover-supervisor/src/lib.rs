//! cutover-supervisor — owns the local broker subprocess.
//!
//! # Architecture
//!
//! ```text
//! Supervisor::run (single control loop, never re-entered)
//!   ├── migration requests  ← mpsc<MigrationRequest> from the control plane
//!   ├── host signals        ← mpsc<HostSignal> from the daemon's signal group
//!   └── broker exit         ← BrokerSession exit watch
//!
//! BrokerSession
//!   ├── spawned `<binary> -c <config>`
//!   ├── background reaper task publishing the exit code
//!   └── shutdown(): SIGINT → grace → SIGKILL → grace
//! ```
//!
//! The binary the broker starts on is picked once, before the first
//! launch, by [`survey::select_binary`]: a fleet that still contains an
//! old-major broker keeps starting new members on the old binary until the
//! coordinator drives the cutover.

pub mod error;
pub mod runner;
pub mod session;
pub mod signal;
pub mod survey;

pub use error::SupervisorError;
pub use runner::{
    MigrationRequest, Supervisor, SupervisorConfig, SupervisorHandle, SupervisorState,
};
pub use session::{BrokerBinary, BrokerSession};
pub use signal::HostSignal;
pub use survey::select_binary;
