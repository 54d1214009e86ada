//! cutover-coordinator — drives a fleet from the old broker major to the new.
//!
//! Run once per node at deploy time. The coordinator checks the local
//! broker's version, finds the bootstrap peer, migrates it first, then fans
//! out to every other peer concurrently:
//!
//! ```text
//! probe local ─▶ on target? ─yes─▶ done
//!                    │ no
//!                    ▼
//!          /info on every peer ─▶ bootstrap? ─none─▶ fail
//!                    │
//!                    ▼
//!        /migrate bootstrap ─409─▶ done (someone else is driving)
//!                    │ 200
//!                    ▼
//!        /migrate rest (concurrent) ─▶ fail if any non-409 failure
//! ```
//!
//! [`verify`] is the post-deploy check run after every node was updated.

pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod peer;
pub mod verify;

pub use coordinator::{Coordinator, CoordinatorSettings};
pub use error::{CoordinatorError, VerifyError};
pub use outcome::{ClusterMigrationResult, CutoverOutcome, PeerMigrationOutcome, PeerStatus};
pub use peer::{PeerClient, RetryPolicy};
pub use verify::{VerifyOutcome, verify};
