use std::{borrow::Cow, collections::HashMap};

use crate::log::dev_warn;

/// The embedding environment a job reports to.
///
/// Everything a running pipeline produces, final and incremental variable values, callback
/// invocations and errors raised outside of a foreground wait, goes through this trait.
pub trait Host {
    /// Assign `value` to the variable `name`.
    fn set_var(&mut self, name: &str, value: &[u8]) -> Result<(), String>;
    /// Invoke the command prefix `command` with `arg` appended as its last word.
    fn eval_callback(&mut self, command: &[String], arg: &[u8]) -> Result<(), String>;
    /// Report an error that has no caller waiting for it.
    fn background_error(&mut self, message: &str);
}

/// An in-memory [`Host`] keeping every value ever assigned.
///
/// Callbacks are recorded instead of evaluated.
#[derive(Debug, Default)]
pub struct VarStore {
    vars: HashMap<String, Vec<Vec<u8>>>,
    callbacks: Vec<(Vec<String>, Vec<u8>)>,
    errors: Vec<String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value of `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.history(name).last().map(Vec::as_slice)
    }

    pub fn get_str(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(String::from_utf8_lossy)
    }

    /// Every value assigned to `name`, oldest first.
    pub fn history(&self, name: &str) -> &[Vec<u8>] {
        self.vars.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn callbacks(&self) -> &[(Vec<String>, Vec<u8>)] {
        &self.callbacks
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl Host for VarStore {
    fn set_var(&mut self, name: &str, value: &[u8]) -> Result<(), String> {
        self.vars
            .entry(name.to_string())
            .or_default()
            .push(value.to_vec());
        Ok(())
    }

    fn eval_callback(&mut self, command: &[String], arg: &[u8]) -> Result<(), String> {
        self.callbacks.push((command.to_vec(), arg.to_vec()));
        Ok(())
    }

    fn background_error(&mut self, message: &str) {
        dev_warn!("background error: {message}");
        self.errors.push(message.to_string());
    }
}
