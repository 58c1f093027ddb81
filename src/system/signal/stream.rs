use std::{
    io,
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::OnceLock,
};

use crate::{cutils::cerr, log::dev_error};

use super::{action::Disposition, handler::SignalHandler, signal_fmt, SignalNumber};

static STREAM: OnceLock<SignalStream> = OnceLock::new();

/// The `siginfo_t` of a signal that went through the stream.
#[repr(transparent)]
pub(crate) struct SignalInfo {
    raw: libc::siginfo_t,
}

impl SignalInfo {
    const SIZE: usize = std::mem::size_of::<Self>();

    pub(crate) fn signal(&self) -> SignalNumber {
        self.raw.si_signo
    }
}

pub(super) extern "C" fn send_siginfo(
    _signal: SignalNumber,
    info: *const SignalInfo,
    _context: *const libc::c_void,
) {
    if let Some(stream) = STREAM.get() {
        // SAFETY: `send` is async-signal-safe and `info` points to a full `siginfo_t`.
        unsafe {
            libc::send(
                stream.tx.as_raw_fd(),
                info.cast(),
                SignalInfo::SIZE,
                libc::MSG_DONTWAIT,
            )
        };
    }
}

/// The receiving end for every handler installed with [`Disposition::Stream`].
///
/// There is at most one of these per process; the read end is nonblocking so it can be
/// drained from an event loop.
pub(crate) struct SignalStream {
    rx: UnixStream,
    tx: UnixStream,
}

impl SignalStream {
    /// Create the stream, or return the one created before.
    pub(crate) fn init() -> io::Result<&'static Self> {
        if let Some(stream) = STREAM.get() {
            return Ok(stream);
        }

        let (rx, tx) = UnixStream::pair().map_err(|err| {
            dev_error!("cannot create the signal socket pair: {err}");
            err
        })?;
        rx.set_nonblocking(true)?;

        Ok(STREAM.get_or_init(|| Self { rx, tx }))
    }

    /// Start streaming `signals`. Their previous actions come back when the handlers drop.
    pub(crate) fn forward<const N: usize>(
        &self,
        signals: [SignalNumber; N],
    ) -> io::Result<[SignalHandler; N]> {
        let mut handlers = Vec::with_capacity(N);
        for signal in signals {
            let handler = SignalHandler::register(signal, Disposition::Stream).map_err(|err| {
                dev_error!("cannot forward {}: {err}", signal_fmt(signal));
                err
            })?;
            handlers.push(handler);
        }

        handlers
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "signal handler count mismatch"))
    }

    /// Take the next pending signal. Fails with `WouldBlock` when none is pending.
    pub(crate) fn recv(&self) -> io::Result<SignalInfo> {
        let mut info = MaybeUninit::<SignalInfo>::uninit();
        // SAFETY: `info` has room for exactly `SignalInfo::SIZE` bytes.
        let bytes = cerr(unsafe {
            libc::recv(
                self.rx.as_raw_fd(),
                info.as_mut_ptr().cast(),
                SignalInfo::SIZE,
                0,
            )
        })?;

        if bytes as usize != SignalInfo::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read from the signal stream",
            ));
        }
        // SAFETY: `recv` filled the whole value and `siginfo_t` is plain old data.
        Ok(unsafe { info.assume_init() })
    }
}

impl AsRawFd for SignalStream {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}
