// oxal-core: Timer callback records and the per-timebase dispatch ring
// The ring is encoded as a slot array keyed by global TIMECB index with
// explicit `next` links, anchored at the owning timebase's `first_cb`.
// Every ring mutation happens under the owner's per-timebase lock.

use std::sync::Arc;

use crate::config;
use crate::id::{self, ObjectClass, ObjectId};
use crate::status::{OsalError, OsalResult};
use crate::timebase::{TimeBaseCore, TimeBasePlatform};

/// User callback dispatched by a timebase helper thread.
///
/// The argument is the callback's own published identifier; any user
/// context travels in the closure capture.
pub type TimerCallback = Arc<dyn Fn(ObjectId) + Send + Sync>;

/// Introspection view of one timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub owner: ObjectId,
    pub wait_time: i64,
    pub interval_time: i64,
    pub backlog_resets: u32,
}

/// One armed callback inside a timebase's ring.
#[derive(Clone)]
pub(crate) struct TimerSlot {
    pub(crate) id: ObjectId,
    pub(crate) wait_time: i64,
    pub(crate) interval_time: i64,
    pub(crate) backlog_resets: u32,
    pub(crate) callback: TimerCallback,
    pub(crate) next: usize,
}

/// Slot storage for the callbacks owned by one timebase.
pub(crate) struct TimerRing {
    slots: Vec<Option<TimerSlot>>,
}

impl TimerRing {
    pub(crate) fn new() -> TimerRing {
        TimerRing {
            slots: (0..config::MAX_TIMECBS).map(|_| None).collect(),
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&TimerSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut TimerSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn insert(&mut self, index: usize, slot: TimerSlot) {
        self.slots[index] = Some(slot);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<TimerSlot> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub(crate) fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

impl crate::timebase::TimeBaseEntry {
    /// Splice a new callback into the ring: the sole member if the ring is
    /// empty, otherwise directly after `first_cb`.
    pub(crate) fn link_timer(&mut self, index: usize, mut slot: TimerSlot) {
        match self.first_cb.and_then(|head| {
            self.timers.get(head).map(|head_slot| (head, head_slot.next))
        }) {
            Some((head, head_next)) => {
                slot.next = head_next;
                self.timers.insert(index, slot);
                if let Some(head_slot) = self.timers.get_mut(head) {
                    head_slot.next = index;
                }
            }
            None => {
                slot.next = index;
                self.timers.insert(index, slot);
                self.first_cb = Some(index);
            }
        }
    }

    /// Remove a callback from the ring, advancing or clearing `first_cb`
    /// when the anchor itself goes away.
    pub(crate) fn unlink_timer(&mut self, index: usize) {
        let Some(removed) = self.timers.remove(index) else {
            return;
        };
        let Some(head) = self.first_cb else {
            return;
        };
        if head == index {
            if removed.next == index {
                self.first_cb = None;
                return;
            }
            self.first_cb = Some(removed.next);
        }
        // Patch the predecessor's link.
        let start = match self.first_cb {
            Some(h) => h,
            None => return,
        };
        let mut cursor = start;
        for _ in 0..=config::MAX_TIMECBS {
            let next = match self.timers.get(cursor) {
                Some(slot) => slot.next,
                None => break,
            };
            if next == index {
                if let Some(slot) = self.timers.get_mut(cursor) {
                    slot.next = removed.next;
                }
                break;
            }
            if next == start {
                break;
            }
            cursor = next;
        }
    }
}

impl TimeBaseCore {
    /// Arm a new callback on `timebase_id`.
    ///
    /// Lock order is TIMEBASE class, then per-timebase, then TIMECB class, the same
    /// order every other timer operation observes. Because the timebase's
    /// class lock is held for the whole splice, the owner cannot be deleted
    /// out from under the new callback.
    pub fn timer_add(
        &self,
        platform: &dyn TimeBasePlatform,
        name: &str,
        timebase_id: ObjectId,
        interval_ticks: u32,
        initial_wait_ticks: u32,
        callback: TimerCallback,
    ) -> OsalResult<ObjectId> {
        if interval_ticks >= config::TICK_ARG_LIMIT
            || initial_wait_ticks >= config::TICK_ARG_LIMIT
        {
            return Err(OsalError::TimerInvalidArgs);
        }
        // A callback re-entering here would take the timebase class lock
        // while its helper holds the per-timebase lock, inverting the lock
        // order; refuse it the same way the timebase-level calls do.
        self.reject_helper_caller(platform)?;
        let tb = self
            .objects()
            .get_global(ObjectClass::TimeBase, timebase_id)?;
        let tb_index = tb.token().index;
        let guard = self.entry_cell(tb_index).lock();

        let creator = platform.current_task_id();
        let res = self
            .objects()
            .allocate_new(ObjectClass::TimerCb, name, creator)?;
        let index = res.index();
        let pending = res.pending_id();
        {
            let mut entry = guard.borrow_mut();
            if entry.bound_id != timebase_id {
                return Err(OsalError::InvalidId);
            }
            entry.link_timer(
                index,
                TimerSlot {
                    id: pending,
                    wait_time: initial_wait_ticks as i64,
                    interval_time: interval_ticks as i64,
                    backlog_resets: 0,
                    callback,
                    next: index,
                },
            );
        }
        self.set_timer_owner(index, timebase_id);
        res.finalize(Ok(()))
    }

    /// Re-arm an existing callback. Valid from a timer callback (the
    /// per-timebase lock is reentrant on the helper thread).
    pub fn timer_set(
        &self,
        id: ObjectId,
        initial_wait_ticks: u32,
        interval_ticks: u32,
    ) -> OsalResult<()> {
        if interval_ticks >= config::TICK_ARG_LIMIT
            || initial_wait_ticks >= config::TICK_ARG_LIMIT
            || (interval_ticks == 0 && initial_wait_ticks == 0)
        {
            return Err(OsalError::TimerInvalidArgs);
        }
        let token = self.objects().check_id(ObjectClass::TimerCb, id)?;
        let owner = self.timer_owner(token.index);
        let tb_index = id::array_index(ObjectClass::TimeBase, owner)
            .map_err(|_| OsalError::IncorrectObjState)?;
        let guard = self.entry_cell(tb_index).lock();
        let mut entry = guard.borrow_mut();
        if entry.bound_id != owner {
            return Err(OsalError::IncorrectObjState);
        }
        let slot = entry.timers.get_mut(token.index).ok_or(OsalError::InvalidId)?;
        if slot.id != id {
            return Err(OsalError::InvalidId);
        }
        slot.wait_time = initial_wait_ticks as i64;
        slot.interval_time = interval_ticks as i64;
        Ok(())
    }

    /// Remove a callback. Valid from the callback's own execution; the
    /// helper saves its traversal link before dispatching, so the ring
    /// survives the unlink.
    pub fn timer_delete(&self, id: ObjectId) -> OsalResult<()> {
        let token = self.objects().check_id(ObjectClass::TimerCb, id)?;
        let owner = self.timer_owner(token.index);
        // Take the owner's per-timebase lock before the TIMECB class lock
        // so the ordering matches timer_add.
        let tb_guard = match id::array_index(ObjectClass::TimeBase, owner) {
            Ok(tb_index) => Some(self.entry_cell(tb_index).lock()),
            // Owner already deleted; the ring is gone and only the record
            // remains.
            Err(_) => None,
        };
        let locked = self.objects().get_exclusive(ObjectClass::TimerCb, id)?;
        let index = locked.token().index;
        if let Some(guard) = &tb_guard {
            let mut entry = guard.borrow_mut();
            if entry.bound_id == owner {
                entry.unlink_timer(index);
            }
        }
        self.set_timer_owner(index, ObjectId::UNDEFINED);
        locked.finalize_delete(Ok(()))
    }

    /// Introspect an armed callback.
    pub fn timer_status(&self, id: ObjectId) -> OsalResult<TimerStatus> {
        let token = self.objects().check_id(ObjectClass::TimerCb, id)?;
        let owner = self.timer_owner(token.index);
        let tb_index = id::array_index(ObjectClass::TimeBase, owner)
            .map_err(|_| OsalError::IncorrectObjState)?;
        let guard = self.entry_cell(tb_index).lock();
        let entry = guard.borrow();
        if entry.bound_id != owner {
            return Err(OsalError::IncorrectObjState);
        }
        let slot = entry.timers.get(token.index).ok_or(OsalError::InvalidId)?;
        if slot.id != id {
            return Err(OsalError::InvalidId);
        }
        Ok(TimerStatus {
            owner,
            wait_time: slot.wait_time,
            interval_time: slot.interval_time,
            backlog_resets: slot.backlog_resets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::TimeBaseEntry;

    fn noop() -> TimerCallback {
        Arc::new(|_| {})
    }

    fn slot(id_serial: u32) -> TimerSlot {
        TimerSlot {
            id: ObjectId::compose(ObjectClass::TimerCb, id_serial),
            wait_time: 10,
            interval_time: 10,
            backlog_resets: 0,
            callback: noop(),
            next: 0,
        }
    }

    fn ring_members(entry: &TimeBaseEntry) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(start) = entry.first_cb else {
            return out;
        };
        let mut cursor = start;
        loop {
            out.push(cursor);
            cursor = entry.timers.get(cursor).unwrap().next;
            if cursor == start {
                break;
            }
        }
        out
    }

    #[test]
    fn test_link_first_member_self_links() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(4, slot(1));
        assert_eq!(entry.first_cb, Some(4));
        assert_eq!(entry.timers.get(4).unwrap().next, 4);
        assert_eq!(ring_members(&entry), vec![4]);
    }

    #[test]
    fn test_link_inserts_after_the_anchor() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(0, slot(1));
        entry.link_timer(5, slot(2));
        entry.link_timer(9, slot(3));
        // Insertions land right after the anchor, most recent first.
        assert_eq!(ring_members(&entry), vec![0, 9, 5]);
    }

    #[test]
    fn test_unlink_middle_member() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(0, slot(1));
        entry.link_timer(5, slot(2));
        entry.link_timer(9, slot(3));
        entry.unlink_timer(9);
        assert_eq!(ring_members(&entry), vec![0, 5]);
    }

    #[test]
    fn test_unlink_anchor_advances_first_cb() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(0, slot(1));
        entry.link_timer(5, slot(2));
        entry.unlink_timer(0);
        assert_eq!(entry.first_cb, Some(5));
        assert_eq!(ring_members(&entry), vec![5]);
    }

    #[test]
    fn test_unlink_last_member_clears_the_anchor() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(7, slot(1));
        entry.unlink_timer(7);
        assert_eq!(entry.first_cb, None);
        assert!(ring_members(&entry).is_empty());
    }

    #[test]
    fn test_unlink_absent_member_is_a_no_op() {
        let mut entry = TimeBaseEntry::bound_for_test();
        entry.link_timer(7, slot(1));
        entry.unlink_timer(3);
        assert_eq!(ring_members(&entry), vec![7]);
    }
}
