#[macro_use]
mod macros;
pub(crate) mod cli;
pub(crate) mod common;
pub(crate) mod cutils;
pub mod exec;
pub(crate) mod log;
pub(crate) mod system;

mod bgexec;

pub use bgexec::main as bgexec_main;
pub use common::Error;
