//! Utilities to handle signals.
use std::borrow::Cow;

mod action;
mod handler;
mod stream;

pub(crate) use action::SignalSet;
pub(crate) use handler::{reset_to_default, SignalHandler};
pub(crate) use stream::SignalStream;

pub type SignalNumber = libc::c_int;

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub(crate) mod consts {
            pub(crate) use libc::{$($signal,)*};
        }

        /// The symbolic name of a signal, e.g. `SIGTERM`.
        pub(crate) fn signal_name(signal: SignalNumber) -> Option<&'static str> {
            match signal {
                $(consts::$signal => Some(stringify!($signal)),)*
                _ => None,
            }
        }

        fn signal_from_name(name: &str) -> Option<SignalNumber> {
            match name {
                $(stringify!($signal) => Some(consts::$signal),)*
                _ => None,
            }
        }
    };
}

define_consts! {
    SIGHUP,
    SIGINT,
    SIGQUIT,
    SIGILL,
    SIGTRAP,
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGKILL,
    SIGUSR1,
    SIGSEGV,
    SIGUSR2,
    SIGPIPE,
    SIGALRM,
    SIGTERM,
    SIGCHLD,
    SIGCONT,
    SIGSTOP,
    SIGTSTP,
    SIGTTIN,
    SIGTTOU,
    SIGURG,
    SIGXCPU,
    SIGXFSZ,
    SIGVTALRM,
    SIGPROF,
    SIGWINCH,
    SIGIO,
    SIGSYS,
}

/// Format a signal for messages, falling back to its number when it has no known name.
pub(crate) fn signal_fmt(signal: SignalNumber) -> Cow<'static, str> {
    signal_name(signal)
        .map(Cow::Borrowed)
        .unwrap_or_else(|| format!("unknown signal #{signal}").into())
}

/// Parse a signal given either by number (`15`), by name (`SIGTERM`) or by name without the
/// `SIG` prefix (`term`, `TERM`).
pub(crate) fn parse_signal(text: &str) -> Option<SignalNumber> {
    let text = text.trim();
    if let Ok(number) = text.parse::<SignalNumber>() {
        return (1..=64).contains(&number).then_some(number);
    }

    let upper = text.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        signal_from_name(&upper)
    } else {
        signal_from_name(&format!("SIG{upper}"))
    }
}
