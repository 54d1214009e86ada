//! TCP version probe.
//!
//! Connects to a broker and reads the handshake banner, retrying the
//! exchange at a fixed interval until a wall-clock budget runs out.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use cutover_core::ProbeConfig;

use crate::banner::parse_banner;
use crate::error::ProbeError;

/// Capability to learn a broker's major version.
///
/// The coordinator and the supervisor's fleet survey depend on this
/// rather than on [`TcpProbe`] directly so tests can substitute a double.
pub trait BrokerProbe: Send + Sync {
    fn major_version(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<u32, ProbeError>> + Send;
}

/// Probe timings.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub budget: Duration,
}

impl From<&ProbeConfig> for ProbeSettings {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            retry_interval: config.retry_interval(),
            budget: config.budget(),
        }
    }
}

/// Production probe speaking the raw handshake over TCP.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    settings: ProbeSettings,
}

impl TcpProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    /// Connect and read the banner line, retrying the whole exchange at a
    /// fixed interval until the budget is spent.
    ///
    /// At least one attempt is always made. No attempt outlives the
    /// deadline by more than the time it takes to notice it.
    pub async fn fetch_banner(&self, address: &str) -> Result<String, ProbeError> {
        let deadline = Instant::now() + self.settings.budget;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.attempt(address, deadline).await {
                Ok(line) => {
                    debug!(%address, attempt, "read broker banner");
                    return Ok(line);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if Instant::now() + self.settings.retry_interval >= deadline {
                info!(%address, attempt, error = %err, "broker unreachable, giving up");
                return Err(err);
            }

            debug!(%address, attempt, error = %err, "broker probe failed, retrying");
            tokio::time::sleep(self.settings.retry_interval).await;
        }
    }

    /// Time allowed for the next step: the connect timeout, capped by
    /// whatever is left of the budget.
    fn step_timeout(&self, deadline: Instant) -> Duration {
        self.settings
            .connect_timeout
            .min(deadline.saturating_duration_since(Instant::now()))
    }

    /// One connect-and-read exchange.
    async fn attempt(&self, address: &str, deadline: Instant) -> Result<String, ProbeError> {
        let connect_err = |source: io::Error| ProbeError::Connect {
            address: address.to_string(),
            budget: self.settings.budget,
            source,
        };
        let io_err = |source: io::Error| ProbeError::Io {
            address: address.to_string(),
            source,
        };

        let stream = tokio::time::timeout(self.step_timeout(deadline), TcpStream::connect(address))
            .await
            .map_err(|_| connect_err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
            .map_err(connect_err)?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = tokio::time::timeout(self.step_timeout(deadline), reader.read_line(&mut line))
            .await
            .map_err(|_| io_err(io::Error::new(io::ErrorKind::TimedOut, "banner read timed out")))?
            .map_err(io_err)?;

        if read == 0 {
            return Err(io_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before banner",
            )));
        }

        Ok(line)
    }
}

impl BrokerProbe for TcpProbe {
    async fn major_version(&self, address: &str) -> Result<u32, ProbeError> {
        let line = self.fetch_banner(address).await?;
        let major = parse_banner(&line)?;
        debug!(%address, major, "probed broker version");
        Ok(major)
    }
}
