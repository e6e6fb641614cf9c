// oxal-host: Hosted binary semaphore
// A flag plus condvar. Give on a full semaphore is not an error; flush
// releases every waiter without consuming the flag; deletion invalidates
// the primitive so orphaned waiters fail out instead of hanging.

use parking_lot::{Condvar, Mutex};

use oxal_core::{OsalError, OsalResult, Timeout};

use crate::wait::WaitLimit;

struct BinSemState {
    value: bool,
    flush_epoch: u64,
    deleted: bool,
}

pub(crate) struct HostBinSem {
    state: Mutex<BinSemState>,
    available: Condvar,
}

impl HostBinSem {
    pub(crate) fn new(initial: bool) -> HostBinSem {
        HostBinSem {
            state: Mutex::new(BinSemState {
                value: initial,
                flush_epoch: 0,
                deleted: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn give(&self) {
        let mut state = self.state.lock();
        state.value = true;
        drop(state);
        self.available.notify_one();
    }

    /// Release every current waiter without consuming the semaphore.
    pub(crate) fn flush(&self) {
        let mut state = self.state.lock();
        state.flush_epoch += 1;
        drop(state);
        self.available.notify_all();
    }

    /// Fail out any blocked takers; called on delete.
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        drop(state);
        self.available.notify_all();
    }

    pub(crate) fn take(&self, timeout: Timeout) -> OsalResult<()> {
        let limit = WaitLimit::resolve(timeout);
        let mut state = self.state.lock();
        let epoch = state.flush_epoch;
        loop {
            if state.deleted {
                return Err(OsalError::SemFailure);
            }
            if state.value {
                state.value = false;
                return Ok(());
            }
            if state.flush_epoch != epoch {
                return Ok(());
            }
            match limit {
                WaitLimit::Poll => return Err(OsalError::SemTimeout),
                WaitLimit::Forever => {
                    self.available.wait(&mut state);
                }
                WaitLimit::Until(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        if state.deleted {
                            return Err(OsalError::SemFailure);
                        }
                        if state.value {
                            state.value = false;
                            return Ok(());
                        }
                        if state.flush_epoch != epoch {
                            return Ok(());
                        }
                        return Err(OsalError::SemTimeout);
                    }
                }
            }
        }
    }
}
