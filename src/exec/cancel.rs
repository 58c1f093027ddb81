use std::{cell::Cell, rc::Rc};

#[derive(Debug, Default)]
struct Trace {
    requested: Cell<bool>,
    armed: Cell<bool>,
}

/// Write trace on a job's status variable.
///
/// Whoever holds a clone may request cancellation by calling [`CancelToken::cancel`], which stands
/// for assigning to the status variable while the job is running. The job disarms its token right
/// before it publishes its own status so that this final write is not taken as a cancellation.
#[derive(Clone, Debug)]
pub struct CancelToken(Rc<Trace>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Rc::new(Trace {
            requested: Cell::new(false),
            armed: Cell::new(true),
        }))
    }

    /// Request cancellation. Has no effect once the job completed or was cancelled.
    pub fn cancel(&self) {
        if self.0.armed.get() {
            self.0.requested.set(true);
        }
    }

    /// Whether cancellation was requested and not acted upon yet.
    pub fn is_pending(&self) -> bool {
        self.0.armed.get() && self.0.requested.get()
    }

    /// Consume a pending request. Returns `true` at most once per token.
    pub(crate) fn take(&self) -> bool {
        if self.is_pending() {
            self.0.armed.set(false);
            true
        } else {
            false
        }
    }

    /// Remove the trace; later writes are ignored.
    pub(crate) fn disarm(&self) {
        self.0.armed.set(false);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The status variable of a job: where its [`StatusRecord`](super::StatusRecord) is published on
/// completion and whose writes cancel it.
#[derive(Clone, Debug, Default)]
pub struct StatusVar {
    name: Option<String>,
    token: CancelToken,
}

impl StatusVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            token: CancelToken::new(),
        }
    }

    /// A status variable that is never published. The job can still be cancelled through its
    /// token.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_consumed_once() {
        let token = CancelToken::new();
        let remote = token.clone();
        assert!(!token.take());

        remote.cancel();
        assert!(token.is_pending());
        assert!(token.take());
        assert!(!token.take());

        remote.cancel();
        assert!(!token.is_pending());
    }

    #[test]
    fn disarmed_token_ignores_writes() {
        let status = StatusVar::new("done");
        let token = status.token();
        token.disarm();
        status.token().cancel();
        assert!(!token.take());
        assert_eq!(status.name(), Some("done"));
    }
}
