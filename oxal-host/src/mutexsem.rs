// oxal-host: Hosted mutex semaphore
// Take and give arrive as separate calls, so the guard-based mutex API
// cannot carry the lock across them; the raw lock interface does, with
// ownership checked against the registered task identity.

use parking_lot::lock_api::RawMutex as RawMutexApi;
use parking_lot::{Mutex, RawMutex};

use oxal_core::{ObjectId, OsalError, OsalResult};

use crate::identity;

pub(crate) struct HostMutex {
    raw: RawMutex,
    owner: Mutex<Option<ObjectId>>,
}

impl HostMutex {
    pub(crate) fn new() -> HostMutex {
        HostMutex {
            raw: RawMutexApi::INIT,
            owner: Mutex::new(None),
        }
    }

    pub(crate) fn take(&self) {
        self.raw.lock();
        *self.owner.lock() = Some(identity::current_task_id());
    }

    pub(crate) fn give(&self) -> OsalResult<()> {
        let mut owner = self.owner.lock();
        if *owner != Some(identity::current_task_id()) {
            return Err(OsalError::Error);
        }
        *owner = None;
        // SAFETY: the raw mutex is held and the ownership check above pins
        // the holder to this thread's registered identity; the owner field
        // is cleared under its own lock before the raw unlock, so a second
        // give cannot pass the check.
        unsafe { self.raw.unlock() };
        Ok(())
    }

    pub(crate) fn is_held(&self) -> bool {
        self.raw.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_take_give_cycle() {
        let mutex = HostMutex::new();
        mutex.take();
        assert!(mutex.is_held());
        assert!(mutex.give().is_ok());
        assert!(!mutex.is_held());
    }

    #[test]
    fn test_give_without_take_is_rejected() {
        let mutex = HostMutex::new();
        assert_eq!(mutex.give(), Err(OsalError::Error));
    }

    #[test]
    fn test_take_excludes_other_threads() {
        let mutex = Arc::new(HostMutex::new());
        mutex.take();
        let contender = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                mutex.take();
                mutex.give()
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!contender.is_finished());
        assert!(mutex.give().is_ok());
        assert!(contender.join().unwrap().is_ok());
    }
}
