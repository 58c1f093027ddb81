use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use crate::common::Error;
use crate::system::signal::{consts::*, SignalNumber};

/// How the raw bytes read from a stream are turned into the value handed to variables and
/// callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamEncoding {
    /// Bytes are delivered untouched and the final value is never trimmed.
    Binary,
    /// Bytes are delivered untouched.
    #[default]
    Ascii,
    /// Bytes are decoded from the given character set into UTF-8.
    Named(&'static encoding_rs::Encoding),
}

impl StreamEncoding {
    pub(crate) fn is_binary(&self) -> bool {
        matches!(self, StreamEncoding::Binary)
    }
}

impl FromStr for StreamEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(StreamEncoding::Binary),
            "ascii" => Ok(StreamEncoding::Ascii),
            label => encoding_rs::Encoding::for_label(label.as_bytes())
                .map(StreamEncoding::Named)
                .ok_or_else(|| Error::Encoding(label.to_string())),
        }
    }
}

impl fmt::Display for StreamEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEncoding::Binary => f.write_str("binary"),
            StreamEncoding::Ascii => f.write_str("ascii"),
            StreamEncoding::Named(encoding) => f.write_str(encoding.name()),
        }
    }
}

/// Which of the collected streams are copied to our own stdout and stderr as they arrive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Echo {
    #[default]
    None,
    Output,
    Error,
    Both,
}

impl FromStr for Echo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Echo::None),
            "stdout" | "output" => Ok(Echo::Output),
            "stderr" | "error" => Ok(Echo::Error),
            "both" => Ok(Echo::Both),
            _ => Err(Error::Options(format!(
                "invalid echo target '{s}', expected one of: none, stdout, stderr, both"
            ))),
        }
    }
}

/// Delivery settings for one of the two collected streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Variable receiving the whole output once the stream closes.
    pub final_var: Option<String>,
    /// Variable set to each line or block as it arrives.
    pub update_var: Option<String>,
    /// Command prefix invoked with each line or block appended as its last word.
    pub callback: Option<Vec<String>>,
    pub echo: bool,
    pub encoding: StreamEncoding,
}

impl StreamOptions {
    /// Whether anything has to be told about data as it arrives.
    pub(crate) fn notifies(&self) -> bool {
        self.echo || self.update_var.is_some() || self.callback.is_some()
    }
}

/// Process class a pipeline is launched in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProcessClass {
    /// Every stage is a direct child and is tracked individually.
    Plain,
    /// The pipeline runs under a session leader in its own session and process group.
    Session,
    /// Like `Session`, with a pseudo-terminal as the leader's controlling terminal.
    Pty,
}

impl ProcessClass {
    /// Signal sent when the pipeline is cancelled or torn down, unless overridden.
    pub(crate) fn default_signal(self) -> SignalNumber {
        match self {
            ProcessClass::Plain => SIGTERM,
            ProcessClass::Session | ProcessClass::Pty => SIGHUP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    pub stdout: StreamOptions,
    pub stderr: StreamOptions,
    /// Keep the trailing newline of final values and lines.
    pub keep_newline: bool,
    /// Deliver notifications per line instead of per block read.
    pub line_buffered: bool,
    /// Do not report an abnormal exit of a foreground pipeline as an error.
    pub ignore_exit_code: bool,
    /// Interval at which a pipeline with closed streams is checked for termination.
    pub poll_interval: Duration,
    /// Signal sent on cancellation; defaults to one suited for the process class.
    pub kill_signal: Option<SignalNumber>,
    /// Leave the pipeline running when the executor shuts down.
    pub detach: bool,
    pub session: bool,
    pub pty: bool,
    /// Environment overrides applied on top of the inherited environment, in order.
    pub env: Vec<(String, String)>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stdout: StreamOptions::default(),
            stderr: StreamOptions::default(),
            keep_newline: false,
            line_buffered: false,
            ignore_exit_code: false,
            poll_interval: Duration::from_millis(1000),
            kill_signal: None,
            detach: false,
            session: false,
            pty: false,
            env: Vec::new(),
        }
    }
}

impl ExecOptions {
    pub fn set_echo(&mut self, echo: Echo) {
        self.stdout.echo = matches!(echo, Echo::Output | Echo::Both);
        self.stderr.echo = matches!(echo, Echo::Error | Echo::Both);
    }

    pub(crate) fn process_class(&self) -> ProcessClass {
        if self.pty {
            ProcessClass::Pty
        } else if self.session {
            ProcessClass::Session
        } else {
            ProcessClass::Plain
        }
    }

    pub(crate) fn kill_signal(&self) -> SignalNumber {
        self.kill_signal
            .unwrap_or_else(|| self.process_class().default_signal())
    }

    /// Environment overrides with later assignments to the same name winning.
    pub(crate) fn environment(&self) -> HashMap<String, String> {
        self.env.iter().cloned().collect()
    }
}
