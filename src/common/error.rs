use std::{fmt, io, path::PathBuf};

use crate::exec::StatusRecord;
use crate::system::signal::{signal_name, SignalNumber};

#[derive(Debug)]
pub enum Error {
    /// Invalid invocation: unknown option, bad value, conflicting flags.
    Options(String),
    /// The command line could not be split into pipeline stages.
    Pipeline(String),
    /// A stage of a plain pipeline could not be started.
    Spawn {
        command: String,
        error: io::Error,
    },
    /// The session leader reported a failure through the message pipe before the pipeline ran.
    Startup(String),
    Io(Option<PathBuf>, io::Error),
    /// Reading one of the output streams failed.
    Stream(io::Error),
    Encoding(String),
    OutOfMemory,
    /// The pipeline terminated abnormally and the exit code was not ignored.
    ChildStatus(StatusRecord),
    /// The pipeline was cancelled and sent the given signal.
    Cancelled(SignalNumber),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Options(e) => write!(f, "{e}"),
            Error::Pipeline(e) => write!(f, "invalid pipeline: {e}"),
            Error::Spawn { command, error } => {
                write!(f, "couldn't execute \"{command}\": {error}")
            }
            Error::Startup(message) => write!(f, "pipeline failed to start: {message}"),
            Error::Io(location, e) => {
                if let Some(path) = location {
                    write!(f, "cannot open '{}': {e}", path.display())
                } else {
                    write!(f, "IO error: {e}")
                }
            }
            Error::Stream(e) => write!(f, "error reading from pipeline: {e}"),
            Error::Encoding(name) => write!(f, "unknown encoding \"{name}\""),
            Error::OutOfMemory => f.write_str("can't allocate memory for output buffer"),
            Error::ChildStatus(record) => f.write_str(record.message()),
            Error::Cancelled(signal) => match signal_name(*signal) {
                Some(name) => write!(f, "pipeline cancelled with {name}"),
                None => write!(f, "pipeline cancelled with signal {signal}"),
            },
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::OutOfMemory {
            Error::OutOfMemory
        } else {
            Error::Io(None, err)
        }
    }
}

impl Error {
    /// The exit code the `bgexec` binary should report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ChildStatus(record) => match record.code() {
                code @ 1.. => code,
                _ => 1,
            },
            Error::Cancelled(signal) => 128 + signal,
            Error::Options(_) | Error::Pipeline(_) | Error::Encoding(_) => 2,
            _ => 1,
        }
    }
}
