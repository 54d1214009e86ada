//! Handshake banner parsing.

use serde::Deserialize;

use crate::error::ProbeError;

const BANNER_PREFIX: &str = "INFO ";

#[derive(Debug, Deserialize)]
struct ServerInfo {
    version: String,
}

/// Parse one `INFO {json}` banner line into the broker's major version.
pub fn parse_banner(line: &str) -> Result<u32, ProbeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line
        .strip_prefix(BANNER_PREFIX)
        .ok_or_else(|| ProbeError::Banner(format!("missing {BANNER_PREFIX:?} prefix: {line:?}")))?;

    let info: ServerInfo = serde_json::from_str(payload)
        .map_err(|e| ProbeError::Banner(format!("{e}: {payload:?}")))?;

    major_version(&info.version)
}

/// Extract the major component of a `<major>.<minor>.<patch>` string.
///
/// Anything with fewer than three dot-separated components, or a
/// non-numeric first component, is rejected.
pub fn major_version(version: &str) -> Result<u32, ProbeError> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() < 3 {
        return Err(ProbeError::MalformedVersion(version.to_string()));
    }

    parts[0]
        .parse::<u32>()
        .map_err(|_| ProbeError::MalformedVersion(version.to_string()))
}
