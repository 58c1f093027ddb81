use std::io;

use crate::log::dev_warn;

use super::{
    action::{Disposition, SignalAction},
    consts::*,
    signal_fmt, SignalNumber,
};

/// A signal action that stays installed while this value is alive.
///
/// Dropping the handler puts back whatever action was installed before it.
pub(crate) struct SignalHandler {
    signal: SignalNumber,
    previous: SignalAction,
}

impl SignalHandler {
    pub(crate) fn register(signal: SignalNumber, disposition: Disposition) -> io::Result<Self> {
        if matches!(signal, SIGKILL | SIGSTOP) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("the action for {} cannot be changed", signal_fmt(signal)),
            ));
        }

        let previous = SignalAction::new(disposition)?.install(signal)?;
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        if let Err(err) = self.previous.install(self.signal) {
            dev_warn!(
                "cannot restore the action for {}: {err}",
                signal_fmt(self.signal)
            );
        }
    }
}

/// Give `signals` their default action for good, e.g. in a freshly forked child that inherited
/// the handlers of its parent.
pub(crate) fn reset_to_default(signals: &[SignalNumber]) -> io::Result<()> {
    let action = SignalAction::new(Disposition::Default)?;
    for &signal in signals {
        action.install(signal)?;
    }
    Ok(())
}
