use std::{cell::RefCell, io, rc::Rc};

use crate::log::dev_info;
use crate::system::{
    interface::ProcessId,
    wait::{Wait, WaitError, WaitOptions},
};

/// Processes that are no longer watched by any job but still have to be reaped.
///
/// Cancelled and torn down pipelines leave their processes here. The table is shared by every
/// job of an [`Executor`](super::Executor) and cleaned up on each of its iterations.
#[derive(Clone, Debug, Default)]
pub struct ProcessTable(Rc<RefCell<Vec<ProcessId>>>);

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn detach(&self, pids: impl IntoIterator<Item = ProcessId>) {
        self.0.borrow_mut().extend(pids);
    }

    /// Reap every detached process that terminated, without blocking. Returns how many were
    /// reaped.
    pub fn reap_detached(&self) -> usize {
        let mut pids = self.0.borrow_mut();
        let before = pids.len();
        pids.retain(|&pid| match pid.wait(WaitOptions::new().no_hang()) {
            Ok((_, status)) => {
                dev_info!("detached {pid} reaped with {status:?}");
                false
            }
            Err(WaitError::NotReady) => true,
            Err(WaitError::Io(err)) => err.kind() == io::ErrorKind::Interrupted,
        });
        before - pids.len()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.0.borrow().contains(&pid)
    }
}
