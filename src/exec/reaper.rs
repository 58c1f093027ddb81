use std::{fmt, io};

use super::{options::ProcessClass, table::ProcessTable};
use crate::log::{dev_info, dev_warn};
use crate::system::{
    interface::ProcessId,
    kill, killpg,
    signal::{signal_fmt, SignalNumber},
    wait::{Wait, WaitError, WaitOptions, WaitStatus},
};

/// How a pipeline ended, as classified from the last wait status reaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Exited,
    Killed,
    Stopped,
    Unknown,
}

impl ExitKind {
    pub fn token(&self) -> &'static str {
        match self {
            ExitKind::Exited => "EXITED",
            ExitKind::Killed => "KILLED",
            ExitKind::Stopped => "STOPPED",
            ExitKind::Unknown => "UNKNOWN",
        }
    }
}

/// The value published to a job's status variable when it completes.
///
/// Displays as `TOKEN PID CODE MESSAGE`, with a message containing spaces enclosed in braces,
/// e.g. `EXITED 4242 3 {child process exited abnormally}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    kind: ExitKind,
    pid: ProcessId,
    code: i32,
    message: String,
}

impl StatusRecord {
    pub(crate) fn from_wait(pid: ProcessId, status: WaitStatus) -> Self {
        let (kind, code, message) = if let Some(code) = status.exit_status() {
            let message = if code == 0 {
                "child completed normally"
            } else {
                "child process exited abnormally"
            };
            (ExitKind::Exited, code, message.to_string())
        } else if let Some(signal) = status.term_signal() {
            (ExitKind::Killed, -1, signal_fmt(signal).into_owned())
        } else if let Some(signal) = status.stop_signal() {
            (ExitKind::Stopped, -1, signal_fmt(signal).into_owned())
        } else {
            (
                ExitKind::Unknown,
                -1,
                format!("unknown wait status 0x{:x}", status.raw()),
            )
        };

        Self {
            kind,
            pid,
            code,
            message,
        }
    }

    /// For a pipeline whose processes were all reaped by someone else.
    pub(crate) fn unavailable(pid: ProcessId) -> Self {
        Self {
            kind: ExitKind::Unknown,
            pid,
            code: -1,
            message: "child process status unavailable".to_string(),
        }
    }

    pub fn kind(&self) -> ExitKind {
        self.kind
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// The exit code, or -1 if the process did not exit on its own.
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_success(&self) -> bool {
        self.kind == ExitKind::Exited && self.code == 0
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} ", self.kind.token(), self.pid, self.code)?;
        if self.message.is_empty() || self.message.contains(char::is_whitespace) {
            write!(f, "{{{}}}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// The processes of one launched pipeline.
pub(crate) struct ProcessGroup {
    class: ProcessClass,
    launched: Vec<ProcessId>,
    tracked: Vec<ProcessId>,
    /// Reaped as stopped, so still alive.
    stopped: Vec<ProcessId>,
    last: Option<(ProcessId, WaitStatus)>,
}

impl ProcessGroup {
    /// `pids` are the stage processes for a plain pipeline and the session leader otherwise.
    pub(crate) fn new(class: ProcessClass, pids: Vec<ProcessId>) -> Self {
        Self {
            class,
            tracked: pids.clone(),
            launched: pids,
            stopped: Vec::new(),
            last: None,
        }
    }

    /// Every process launched, in pipeline order.
    pub(crate) fn pids(&self) -> &[ProcessId] {
        &self.launched
    }

    /// Processes not reaped yet.
    pub(crate) fn tracked(&self) -> &[ProcessId] {
        &self.tracked
    }

    /// Send `signal` to every process still tracked, or to the session's process group.
    pub(crate) fn kill(&self, signal: SignalNumber) {
        let result = match self.class {
            ProcessClass::Plain => self.tracked.iter().try_for_each(|&pid| {
                match kill(pid, signal) {
                    Err(err) if err.raw_os_error() != Some(libc::ESRCH) => Err(err),
                    _ => Ok(()),
                }
            }),
            ProcessClass::Session | ProcessClass::Pty => match self.tracked.first() {
                Some(&leader) => killpg(leader, signal),
                None => Ok(()),
            },
        };
        if let Err(err) = result {
            dev_warn!("cannot send {} to pipeline: {err}", signal_fmt(signal));
        }
    }

    /// Reap whatever terminated without blocking. Returns the record of the pipeline once every
    /// process was reaped.
    pub(crate) fn check(&mut self) -> Option<StatusRecord> {
        let final_stage = self.launched.last().copied();
        let (last, stopped) = (&mut self.last, &mut self.stopped);
        self.tracked.retain(|&pid| {
            match pid.wait(WaitOptions::new().no_hang().untraced()) {
                Ok((_, status)) => {
                    dev_info!("{pid} reaped with {status:?}");
                    if status.stop_signal().is_some() {
                        stopped.push(pid);
                    }
                    // The final stage decides the status of the pipeline.
                    if last.is_none() || Some(pid) == final_stage {
                        *last = Some((pid, status));
                    }
                    false
                }
                Err(WaitError::NotReady) => true,
                Err(WaitError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => true,
                Err(WaitError::Io(err)) => {
                    if err.raw_os_error() != Some(libc::ECHILD) {
                        dev_warn!("cannot wait for {pid}: {err}");
                    }
                    false
                }
            }
        });

        if !self.tracked.is_empty() {
            return None;
        }

        Some(match self.last {
            Some((pid, status)) => StatusRecord::from_wait(pid, status),
            None => {
                let pid = self.launched.last().copied().unwrap_or(ProcessId::new(0));
                StatusRecord::unavailable(pid)
            }
        })
    }

    /// Hand the processes that may still be alive to `table`.
    pub(crate) fn detach(&mut self, table: &ProcessTable) {
        table.detach(self.tracked.drain(..).chain(self.stopped.drain(..)));
    }
}
