use std::{
    collections::BTreeMap,
    io,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use crate::cutils::cerr;
use libc::{c_int, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL};

/// Descriptors watched for readability with `poll(2)`, each under a key of the caller's choice.
pub struct PollSet<K> {
    fds: BTreeMap<K, RawFd>,
}

impl<K: Ord + Clone> PollSet<K> {
    /// Create an empty set of file descriptors.
    pub const fn new() -> Self {
        Self {
            fds: BTreeMap::new(),
        }
    }

    /// Watch `fd` under `key`, replacing whatever was watched under that key before.
    pub fn add_reader<F: AsRawFd>(&mut self, key: K, fd: &F) {
        self.fds.insert(key, fd.as_raw_fd());
    }

    /// Remove the file descriptor under the provided key. Returns `true` if it was in the set.
    pub fn remove_fd(&mut self, key: &K) -> bool {
        self.fds.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Block until a descriptor is readable or `timeout` elapses (`None` waits forever) and return
    /// the keys of the ready descriptors in key order.
    ///
    /// A descriptor whose peer hung up counts as ready so the reader gets to see end-of-stream.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<K>> {
        let mut fds: Vec<pollfd> = self
            .fds
            .values()
            .map(|&fd| pollfd {
                fd,
                events: POLLIN,
                revents: 0,
            })
            .collect();

        let timeout = match timeout {
            // Round up so a 0.4ms timer doesn't turn into a busy loop.
            Some(timeout) => ((timeout.as_micros() + 999) / 1000)
                .try_into()
                .unwrap_or(c_int::MAX),
            None => -1,
        };

        // SAFETY: `fds` is a valid array of `fds.len()` entries.
        cerr(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, timeout) })?;

        let ready = POLLIN | POLLHUP | POLLERR | POLLNVAL;
        Ok(self
            .fds
            .keys()
            .zip(fds)
            .filter(|(_, fd)| fd.revents & ready != 0)
            .map(|(key, _)| key.clone())
            .collect())
    }
}
