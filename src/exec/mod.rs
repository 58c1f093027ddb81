//! Running pipelines in the background and collecting their output as it arrives.
//!
//! An [`Executor`] owns the event loop. Each call to [`Executor::run`] launches a pipeline as a
//! job, whose standard output and standard error are read through non-blocking descriptors into
//! growable buffers. Arriving data is delivered per block or per line to a [`Host`], and when the
//! pipeline terminates its [`StatusRecord`] is published to the job's [`StatusVar`].
mod cancel;
mod controller;
mod cook;
mod event;
mod executor;
mod host;
mod launch;
mod notify;
mod options;
mod pipeline;
mod reaper;
mod sink;
mod table;

#[cfg(test)]
mod tests;

pub use cancel::{CancelToken, StatusVar};
pub use controller::JobId;
pub use executor::{Executor, Outcome};
pub use host::{Host, VarStore};
pub use options::{Echo, ExecOptions, StreamEncoding, StreamOptions};
pub use reaper::{ExitKind, StatusRecord};
pub use table::ProcessTable;

pub use crate::system::interface::ProcessId;
pub use crate::system::signal::SignalNumber;
