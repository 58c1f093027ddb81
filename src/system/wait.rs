use std::{fmt, io};

use libc::{c_int, WNOHANG, WUNTRACED};

use crate::cutils::cerr;
use crate::system::{
    interface::ProcessId,
    signal::{signal_fmt, SignalNumber},
};

mod sealed {
    pub(crate) trait Sealed {}

    impl Sealed for crate::system::interface::ProcessId {}
}

pub(crate) trait Wait: sealed::Sealed {
    /// `waitpid(2)` on this process.
    ///
    /// Blocks until the process terminates, unless [`WaitOptions`] says otherwise.
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError>;
}

impl Wait for ProcessId {
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError> {
        let mut raw: c_int = 0;
        // SAFETY: `raw` outlives the call.
        let pid = cerr(unsafe { libc::waitpid(self.get(), &mut raw, options.flags) })
            .map_err(WaitError::Io)?;

        match pid {
            0 => Err(WaitError::NotReady),
            pid => Ok((ProcessId::new(pid), WaitStatus(raw))),
        }
    }
}

#[derive(Debug)]
pub enum WaitError {
    /// The process has not changed state yet. Only happens with [`WaitOptions::no_hang`].
    NotReady,
    Io(io::Error),
}

#[derive(Clone, Copy, Default)]
pub struct WaitOptions {
    flags: c_int,
}

impl WaitOptions {
    pub const fn new() -> Self {
        Self { flags: 0 }
    }

    /// `WNOHANG`: do not block when nothing changed.
    pub const fn no_hang(self) -> Self {
        Self {
            flags: self.flags | WNOHANG,
        }
    }

    /// `WUNTRACED`: also report processes that were stopped.
    pub const fn untraced(self) -> Self {
        Self {
            flags: self.flags | WUNTRACED,
        }
    }
}

/// A status word filled in by `waitpid`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus(c_int);

impl WaitStatus {
    #[cfg(test)]
    pub const fn from_raw(raw: c_int) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> c_int {
        self.0
    }

    /// The code passed to `exit` by a process that terminated by itself.
    pub const fn exit_status(&self) -> Option<c_int> {
        if libc::WIFEXITED(self.0) {
            Some(libc::WEXITSTATUS(self.0))
        } else {
            None
        }
    }

    /// The signal that killed the process.
    pub const fn term_signal(&self) -> Option<SignalNumber> {
        if libc::WIFSIGNALED(self.0) {
            Some(libc::WTERMSIG(self.0))
        } else {
            None
        }
    }

    /// The signal that stopped the process.
    pub const fn stop_signal(&self) -> Option<SignalNumber> {
        if libc::WIFSTOPPED(self.0) {
            Some(libc::WSTOPSIG(self.0))
        } else {
            None
        }
    }
}

impl fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_status(), self.term_signal(), self.stop_signal()) {
            (Some(code), _, _) => write!(f, "exit {code}"),
            (_, Some(signal), _) => write!(f, "killed by {}", signal_fmt(signal)),
            (_, _, Some(signal)) => write!(f, "stopped by {}", signal_fmt(signal)),
            _ => write!(f, "raw status {:#x}", self.0),
        }
    }
}
