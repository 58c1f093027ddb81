use std::{
    collections::BTreeSet,
    ffi::{c_int, c_uint},
    fs::File,
    io,
    os::fd::{AsRawFd, FromRawFd, RawFd},
};

use crate::cutils::cerr;
use interface::ProcessId;

use self::signal::SignalNumber;

// generalized traits for when we want to hide implementations
pub mod interface;

pub mod poll;

pub mod signal;

pub mod term;

pub mod wait;

pub(crate) fn _exit(status: c_int) -> ! {
    unsafe { libc::_exit(status) }
}

/// Closes every descriptor above the standard streams except the ones passed to
/// [`FileCloser::except`].
///
/// Meant for forked children that do not `exec`, as they would otherwise keep the
/// close-on-exec descriptors of their parent open for as long as they live.
pub(crate) struct FileCloser {
    fds: BTreeSet<c_uint>,
}

impl FileCloser {
    pub(crate) const fn new() -> Self {
        Self {
            fds: BTreeSet::new(),
        }
    }

    pub(crate) fn except<F: AsRawFd>(&mut self, fd: &F) {
        self.fds.insert(fd.as_raw_fd() as c_uint);
    }

    pub(crate) fn close_the_universe(self) -> io::Result<()> {
        let mut min_fd = libc::STDERR_FILENO as c_uint + 1;
        for fd in self.fds {
            if let Some(max_fd) = fd.checked_sub(1) {
                close_range(min_fd, max_fd)?;
            }
            min_fd = min_fd.max(fd.saturating_add(1));
        }
        close_range(min_fd, c_uint::MAX)
    }
}

fn close_range(min_fd: c_uint, max_fd: c_uint) -> io::Result<()> {
    if min_fd > max_fd {
        return Ok(());
    }

    match cerr(unsafe { libc::syscall(libc::SYS_close_range, min_fd, max_fd, 0 as c_uint) }) {
        Ok(_) => Ok(()),
        // Kernels before 5.9: close them one by one up to the descriptor limit.
        Err(err) if err.raw_os_error() == Some(libc::ENOSYS) => {
            let limit = cerr(unsafe { libc::sysconf(libc::_SC_OPEN_MAX) })?;
            let limit = c_uint::try_from(limit).unwrap_or(c_uint::MAX);
            for fd in min_fd..=max_fd.min(limit) {
                unsafe { libc::close(fd as c_int) };
            }
            Ok(())
        }
        Err(err) => Err(err),
    }
}

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
///
/// # Safety
///
/// In a multithreaded program, only async-signal-safe functions are guaranteed to work in the
/// child process until a call to `execve` or a similar function is done.
pub(crate) unsafe fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Start a new session with the calling process as its leader.
pub fn setsid() -> io::Result<ProcessId> {
    cerr(unsafe { libc::setsid() }).map(ProcessId::new)
}

/// Send a signal to a process with the specified ID.
pub fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

/// Send a signal to a process group with the specified ID.
pub fn killpg(pgid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pgid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::killpg(pgid.get(), signal) }).map(|_| ())
}

/// Get a process group ID.
#[cfg(test)]
pub fn getpgid(pid: ProcessId) -> io::Result<ProcessId> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID
    cerr(unsafe { libc::getpgid(pid.get()) }).map(ProcessId::new)
}

/// Create a unidirectional pipe, returning the read and the write end.
///
/// Both ends are close-on-exec, so they only reach a child through an explicit `dup2`.
pub(crate) fn pipe() -> io::Result<(File, File)> {
    let mut fds: [c_int; 2] = [-1; 2];
    cerr(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    // SAFETY: `pipe2` succeeded so both descriptors are open and owned by nobody else.
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Put a descriptor in non-blocking mode.
pub(crate) fn set_nonblocking<F: AsRawFd>(fd: &F) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    let flags = cerr(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        cerr(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

/// Set or clear the close-on-exec flag of a raw descriptor.
pub(crate) fn set_cloexec(fd: RawFd, cloexec: bool) -> io::Result<()> {
    let flags = cerr(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    let flags = if cloexec {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    cerr(unsafe { libc::fcntl(fd, libc::F_SETFD, flags) }).map(|_| ())
}

/// Duplicate `fd` onto `target`. The duplicate never has the close-on-exec flag.
pub(crate) fn dup2<F: AsRawFd>(fd: &F, target: RawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    if fd == target {
        return set_cloexec(target, false);
    }
    cerr(unsafe { libc::dup2(fd, target) }).map(|_| ())
}
