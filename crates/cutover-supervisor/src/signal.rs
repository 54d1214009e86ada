//! Host signals forwarded to the broker.

use std::fmt;

/// Signals the daemon relays to its members and on to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
    Kill,
}

impl HostSignal {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            HostSignal::Interrupt => libc::SIGINT,
            HostSignal::Terminate => libc::SIGTERM,
            HostSignal::Hangup => libc::SIGHUP,
            HostSignal::Quit => libc::SIGQUIT,
            HostSignal::Kill => libc::SIGKILL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HostSignal::Interrupt => "SIGINT",
            HostSignal::Terminate => "SIGTERM",
            HostSignal::Hangup => "SIGHUP",
            HostSignal::Quit => "SIGQUIT",
            HostSignal::Kill => "SIGKILL",
        }
    }

    /// Whether the supervisor stops after forwarding this signal. SIGHUP
    /// asks the broker to reload and leaves it running.
    pub fn is_terminating(self) -> bool {
        !matches!(self, HostSignal::Hangup)
    }
}

impl fmt::Display for HostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
