//! A single live broker subprocess.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::signal::HostSignal;

/// Which of the two configured broker binaries a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBinary {
    Old,
    New,
}

/// One broker subprocess, started as `<binary> -c <config>`.
///
/// A background task reaps the child and publishes its exit code, so the
/// session can be signalled and awaited without holding the `Child`.
#[derive(Debug)]
pub struct BrokerSession {
    pid: i32,
    binary: BrokerBinary,
    exited: watch::Receiver<Option<i32>>,
}

impl BrokerSession {
    /// Spawn the broker. Must be called inside a tokio runtime.
    pub fn launch(
        binary: BrokerBinary,
        bin_path: &Path,
        config_path: &Path,
    ) -> Result<Self, SupervisorError> {
        let launch_err = |source: io::Error| SupervisorError::Launch {
            path: bin_path.to_path_buf(),
            source: Arc::new(source),
        };

        let mut child = Command::new(bin_path)
            .arg("-c")
            .arg(config_path)
            .spawn()
            .map_err(launch_err)?;

        let pid = child
            .id()
            .ok_or_else(|| launch_err(io::Error::other("broker exited before reporting a pid")))?
            as i32;

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait on broker");
                    -1
                }
            };
            debug!(pid, code, "broker reaped");
            let _ = exit_tx.send(Some(code));
        });

        info!(pid, ?binary, path = %bin_path.display(), "broker launched");
        Ok(Self {
            pid,
            binary,
            exited: exit_rx,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn binary(&self) -> BrokerBinary {
        self.binary
    }

    /// Last known exit code, `None` while the broker is still running.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exited.borrow()
    }

    /// Deliver a signal. A no-op once the broker has been reaped, so a
    /// recycled pid is never targeted.
    pub fn signal(&self, signal: HostSignal) -> Result<(), SupervisorError> {
        if self.exit_code().is_some() {
            return Ok(());
        }

        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(self.pid, signal.as_raw()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(SupervisorError::Signal {
                signal: signal.name(),
                pid: self.pid,
                source: Arc::new(err),
            });
        }
        debug!(pid = self.pid, %signal, "signalled broker");
        Ok(())
    }

    /// Resolve with the exit code once the broker has exited.
    pub async fn wait_exit(&mut self) -> i32 {
        match self.exited.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(-1),
            // The reaper never drops the sender without publishing.
            Err(_) => -1,
        }
    }

    /// Graceful stop: interrupt, wait `grace`, then kill and wait `grace`
    /// again. Returns the exit code if the broker went away in time.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<i32> {
        if let Err(e) = self.signal(HostSignal::Interrupt) {
            warn!(pid = self.pid, error = %e, "failed to interrupt broker");
        }
        if let Ok(code) = tokio::time::timeout(grace, self.wait_exit()).await {
            info!(pid = self.pid, code, "broker stopped");
            return Some(code);
        }

        warn!(pid = self.pid, ?grace, "broker ignored interrupt, killing");
        if let Err(e) = self.signal(HostSignal::Kill) {
            warn!(pid = self.pid, error = %e, "failed to kill broker");
        }
        match tokio::time::timeout(grace, self.wait_exit()).await {
            Ok(code) => {
                info!(pid = self.pid, code, "broker killed");
                Some(code)
            }
            Err(_) => {
                warn!(pid = self.pid, "broker still running after kill");
                None
            }
        }
    }
}

/// Map an exit status to a code, using the shell's `128 + signal`
/// convention for signal deaths.
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
