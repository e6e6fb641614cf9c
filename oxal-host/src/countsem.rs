// oxal-host: Hosted counting semaphore

use parking_lot::{Condvar, Mutex};

use oxal_core::{OsalError, OsalResult, Timeout};

use crate::wait::WaitLimit;

struct CountSemState {
    count: u32,
    deleted: bool,
}

pub(crate) struct HostCountSem {
    state: Mutex<CountSemState>,
    available: Condvar,
}

impl HostCountSem {
    pub(crate) fn new(initial: u32) -> HostCountSem {
        HostCountSem {
            state: Mutex::new(CountSemState {
                count: initial,
                deleted: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn give(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(1);
        drop(state);
        self.available.notify_one();
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        drop(state);
        self.available.notify_all();
    }

    pub(crate) fn take(&self, timeout: Timeout) -> OsalResult<()> {
        let limit = WaitLimit::resolve(timeout);
        let mut state = self.state.lock();
        loop {
            if state.deleted {
                return Err(OsalError::SemFailure);
            }
            if state.count > 0 {
                state.count -= 1;
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
                        if state.count > 0 {
                            state.count -= 1;
                            return Ok(());
                        }
                        return Err(OsalError::SemTimeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_count_drains_and_refills() {
        let sem = HostCountSem::new(2);
        assert!(sem.take(Timeout::Poll).is_ok());
        assert!(sem.take(Timeout::Poll).is_ok());
        assert_eq!(sem.take(Timeout::Poll), Err(OsalError::SemTimeout));
        sem.give();
        assert!(sem.take(Timeout::Poll).is_ok());
    }

    #[test]
    fn test_each_give_wakes_one_taker() {
        let sem = Arc::new(HostCountSem::new(0));
        let takers: Vec<_> = (0..2)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.take(Timeout::Millis(500)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        sem.give();
        sem.give();
        for taker in takers {
            assert!(taker.join().unwrap().is_ok());
        }
    }

    #[test]
    fn test_timed_take_expires_empty() {
        let sem = HostCountSem::new(0);
        assert_eq!(sem.take(Timeout::Millis(20)), Err(OsalError::SemTimeout));
    }
}
