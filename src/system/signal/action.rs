use std::{io, mem::MaybeUninit};

use crate::cutils::cerr;

use super::SignalNumber;

/// What the process does when a signal arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The action the kernel applies when no handler is installed.
    Default,
    /// Write the `siginfo_t` into the [`super::SignalStream`] socket.
    Stream,
}

/// A set of signals as understood by `sigprocmask(2)` and `sigaction(2)`.
#[repr(transparent)]
pub(crate) struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    fn filled_by(fill: unsafe extern "C" fn(*mut libc::sigset_t) -> libc::c_int) -> io::Result<Self> {
        let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
        // SAFETY: `fill` only writes to the set it is given.
        cerr(unsafe { fill(set.as_mut_ptr()) })?;
        // SAFETY: `fill` succeeded so the set is initialized.
        Ok(Self {
            raw: unsafe { set.assume_init() },
        })
    }

    pub(crate) fn empty() -> io::Result<Self> {
        Self::filled_by(libc::sigemptyset)
    }

    pub(crate) fn full() -> io::Result<Self> {
        Self::filled_by(libc::sigfillset)
    }

    /// Block exactly the signals in this set and return the previous mask.
    pub(crate) fn set_mask(&self) -> io::Result<Self> {
        let mut previous = MaybeUninit::<libc::sigset_t>::zeroed();
        // SAFETY: both pointers are valid for the duration of the call.
        cerr(unsafe { libc::sigprocmask(libc::SIG_SETMASK, &self.raw, previous.as_mut_ptr()) })?;
        // SAFETY: `sigprocmask` succeeded and wrote the previous mask.
        Ok(Self {
            raw: unsafe { previous.assume_init() },
        })
    }
}

/// An owned `struct sigaction`.
#[repr(transparent)]
pub(super) struct SignalAction {
    raw: libc::sigaction,
}

impl SignalAction {
    pub(super) fn new(disposition: Disposition) -> io::Result<Self> {
        // SAFETY: all-zeroes is a valid `sigaction`. Its layout differs between platforms, so it
        // is not built with a struct literal.
        let mut raw: libc::sigaction = unsafe { std::mem::zeroed() };

        match disposition {
            Disposition::Default => {
                raw.sa_sigaction = libc::SIG_DFL;
                raw.sa_mask = SignalSet::empty()?.raw;
                raw.sa_flags = libc::SA_RESTART;
            }
            Disposition::Stream => {
                // `send_siginfo` must not be interrupted by another signal.
                raw.sa_sigaction = super::stream::send_siginfo as libc::sighandler_t;
                raw.sa_mask = SignalSet::full()?.raw;
                raw.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
            }
        }

        Ok(Self { raw })
    }

    /// Install this action for `signal`, returning the one it replaces.
    pub(super) fn install(&self, signal: SignalNumber) -> io::Result<Self> {
        let mut previous = MaybeUninit::<libc::sigaction>::zeroed();
        // SAFETY: both pointers are valid for the duration of the call.
        cerr(unsafe { libc::sigaction(signal, &self.raw, previous.as_mut_ptr()) })?;
        // SAFETY: `sigaction` succeeded and wrote the previous action.
        Ok(Self {
            raw: unsafe { previous.assume_init() },
        })
    }
}
