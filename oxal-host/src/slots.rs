// oxal-host: Per-class storage for hosted primitive state
// Indexed by the local index the ID manager hands out. Install runs with
// the class lock held (create handoff); get is the unlocked hot path, so
// state is shared out behind an Arc.

use std::sync::Arc;

use parking_lot::Mutex;

pub(crate) struct SlotTable<T> {
    slots: Vec<Mutex<Option<Arc<T>>>>,
}

impl<T> SlotTable<T> {
    pub(crate) fn new(capacity: usize) -> SlotTable<T> {
        SlotTable {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub(crate) fn install(&self, index: usize, value: T) {
        *self.slots[index].lock() = Some(Arc::new(value));
    }

    pub(crate) fn get(&self, index: usize) -> Option<Arc<T>> {
        self.slots[index].lock().clone()
    }

    pub(crate) fn take(&self, index: usize) -> Option<Arc<T>> {
        self.slots[index].lock().take()
    }
}
