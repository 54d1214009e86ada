//! cutover-probe — broker version probing over the raw wire handshake.
//!
//! A broker writes a single `INFO {json}` line as soon as a client
//! connects. The probe reads that line and pulls the major version out of
//! the `version` field, without speaking any more of the protocol.
//!
//! # Error classes
//!
//! Callers must tell apart "the broker is not reachable (yet)" from "the
//! broker answered with something we do not understand":
//!
//! - [`ProbeError::Connect`] / [`ProbeError::Io`] are retryable.
//! - [`ProbeError::Banner`] / [`ProbeError::MalformedVersion`] are fatal.
//!
//! [`ProbeError::is_retryable`] encodes that split.

pub mod banner;
pub mod error;
pub mod probe;

pub use banner::{major_version, parse_banner};
pub use error::ProbeError;
pub use probe::{BrokerProbe, ProbeSettings, TcpProbe};
