use std::{
    ffi::{c_uchar, OsString},
    fs::File,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::null_mut,
};

use crate::cutils::{cerr, os_string_from_ptr};

/// Both ends of a freshly allocated pseudo-terminal.
pub(crate) struct Pty {
    /// Path of the follower side, e.g. `/dev/pts/3`.
    pub(crate) path: OsString,
    /// The side bgexec reads the command's output from.
    pub(crate) leader: File,
    /// The side that becomes the command's terminal.
    pub(crate) follower: File,
}

impl Pty {
    pub(crate) fn open() -> io::Result<Self> {
        let mut path = vec![0 as c_uchar; libc::PATH_MAX as usize + 1];
        let (mut leader, mut follower) = (0, 0);

        // SAFETY: `path` is zeroed and longer than any name `openpty` writes; the termios and
        // winsize arguments may be null.
        cerr(unsafe {
            libc::openpty(
                &mut leader,
                &mut follower,
                path.as_mut_ptr().cast(),
                null_mut::<libc::termios>(),
                null_mut::<libc::winsize>(),
            )
        })?;

        // SAFETY: `openpty` succeeded, so we own both descriptors.
        let (leader, follower) = unsafe {
            (
                File::from(OwnedFd::from_raw_fd(leader)),
                File::from(OwnedFd::from_raw_fd(follower)),
            )
        };
        // The follower reaches the command through `dup2` only.
        super::set_cloexec(leader.as_raw_fd(), true)?;
        super::set_cloexec(follower.as_raw_fd(), true)?;

        // SAFETY: the buffer is NUL-terminated.
        let path = unsafe { os_string_from_ptr(path.as_ptr().cast()) };

        Ok(Self {
            path,
            leader,
            follower,
        })
    }
}

mod sealed {
    use std::os::fd::AsRawFd;

    pub(crate) trait Sealed {}

    impl<F: AsRawFd> Sealed for F {}
}

pub(crate) trait Terminal: sealed::Sealed {
    /// Make this terminal the controlling terminal of the calling session leader.
    fn make_controlling_terminal(&self) -> io::Result<()>;
}

impl<F: AsRawFd> Terminal for F {
    fn make_controlling_terminal(&self) -> io::Result<()> {
        // SAFETY: `TIOCSCTTY` takes an integer argument and touches no memory of ours.
        cerr(unsafe { libc::ioctl(self.as_raw_fd(), libc::TIOCSCTTY as _, 0) })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{IsTerminal, Read, Write},
        os::{fd::AsRawFd, unix::net::UnixStream},
        path::PathBuf,
        process::exit,
    };

    use crate::system::{fork, setsid, term::*, ForkResult};

    #[test]
    fn open_pty() {
        let pty = Pty::open().unwrap();
        assert!(pty.leader.is_terminal());
        assert!(pty.follower.is_terminal());

        let path = PathBuf::from(pty.path);
        assert!(path.starts_with("/dev/pts/"));
        assert!(path.try_exists().unwrap());
    }

    #[test]
    fn follower_becomes_controlling_terminal_of_new_session() {
        let (mut rx, mut tx) = UnixStream::pair().unwrap();

        let ForkResult::Parent(_) = (unsafe { fork() }).unwrap() else {
            let pty = Pty::open().unwrap();
            let session = setsid().unwrap();
            pty.follower.make_controlling_terminal().unwrap();
            // The new session leader is the foreground group of its terminal.
            let foreground = unsafe { libc::tcgetpgrp(pty.follower.as_raw_fd()) };
            tx.write_all(&[u8::from(foreground == session.get())]).unwrap();
            exit(0);
        };
        drop(tx);

        let mut buf = [0];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 1);
    }
}
