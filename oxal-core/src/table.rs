// oxal-core: One locked record array per resource class

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::id::ObjectClass;
use crate::record::ObjectRecord;

/// The record array and lock for a single resource class.
///
/// All record mutation happens with the class mutex held. The condvar wakes
/// exclusive waiters whenever a slot's refcount drains to zero; it is tied
/// to the class mutex, not to an individual slot.
pub struct ClassTable {
    class: ObjectClass,
    records: Mutex<Vec<ObjectRecord>>,
    drained: Condvar,
}

impl ClassTable {
    pub fn new(class: ObjectClass) -> ClassTable {
        let records = (0..class.capacity()).map(ObjectRecord::vacant).collect();
        ClassTable {
            class,
            records: Mutex::new(records),
            drained: Condvar::new(),
        }
    }

    #[inline(always)]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Acquire the class lock. Not recursive; releasing is valid from any
    /// task because the guard travels with the caller.
    pub fn lock(&self) -> MutexGuard<'_, Vec<ObjectRecord>> {
        self.records.lock()
    }

    /// Park until [`ClassTable::notify_drained`] while the class lock is
    /// released; the guard is reacquired before return.
    pub(crate) fn wait_drained(&self, guard: &mut MutexGuard<'_, Vec<ObjectRecord>>) {
        self.drained.wait(guard);
    }

    /// Wake every exclusive waiter so each can re-check its slot.
    pub(crate) fn notify_drained(&self) {
        self.drained.notify_all();
    }
}
