// oxal-core: Timebase records and the helper-thread service loop
// One helper thread per timebase pulls ticks from a sync source and walks
// the callback ring under the per-timebase lock. The lock is reentrant so
// a dispatched callback can re-enter the timer API; record state lives in
// a RefCell whose borrow is dropped around every callback invocation.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, ReentrantMutex};

use crate::config;
use crate::id::{ObjectClass, ObjectId};
use crate::manager::ObjectTables;
use crate::status::{OsalError, OsalResult};
use crate::timer::TimerRing;

/// Consecutive zero-tick sync returns tolerated before the one-shot
/// starvation warning fires.
pub const SYNC_SPIN_LIMIT: u32 = 4;

/// Backoff applied after every zero-tick sync return, so a degenerate
/// source can never turn the helper into a busy loop.
pub const SYNC_BACKOFF_MS: u64 = 10;

/// Tick provider for a timebase helper.
///
/// A return of zero means "no information; try again"; the helper backs
/// off before retrying. Implemented by the host's internal interval ticker
/// or supplied by the user for externally synchronized timebases.
pub trait SyncSource: Send {
    fn wait_for_tick(&mut self) -> u32;
}

impl<F> SyncSource for F
where
    F: FnMut() -> u32 + Send,
{
    fn wait_for_tick(&mut self) -> u32 {
        self()
    }
}

/// Shared state of one timebase slot, guarded by the per-timebase lock.
pub struct TimeBaseEntry {
    /// Identifier this entry was published under; `UNDEFINED` once the
    /// timebase is deleted. The helper re-checks this after every wake;
    /// it is the deletion handshake.
    pub(crate) bound_id: ObjectId,
    pub(crate) nominal_start_time: u32,
    pub(crate) nominal_interval_time: u32,
    pub(crate) accuracy_usec: u32,
    pub(crate) external_sync: bool,
    /// Total ticks serviced; monotonic on a live timebase, wrap allowed.
    pub(crate) freerun_time: u32,
    /// Starvation warnings emitted by the helper.
    pub(crate) sync_warnings: u32,
    /// Anchor of the callback ring, or `None` when no callbacks are armed.
    pub(crate) first_cb: Option<usize>,
    pub(crate) timers: TimerRing,
}

impl TimeBaseEntry {
    pub(crate) fn vacant() -> TimeBaseEntry {
        TimeBaseEntry {
            bound_id: ObjectId::UNDEFINED,
            nominal_start_time: 0,
            nominal_interval_time: 0,
            accuracy_usec: 0,
            external_sync: false,
            freerun_time: 0,
            sync_warnings: 0,
            first_cb: None,
            timers: TimerRing::new(),
        }
    }

    pub(crate) fn bound(id: ObjectId, external_sync: bool) -> TimeBaseEntry {
        TimeBaseEntry {
            bound_id: id,
            accuracy_usec: if external_sync {
                0
            } else {
                config::MICROSECS_PER_TICK
            },
            external_sync,
            ..TimeBaseEntry::vacant()
        }
    }

    #[cfg(test)]
    pub(crate) fn bound_for_test() -> TimeBaseEntry {
        TimeBaseEntry::bound(ObjectId::compose(ObjectClass::TimeBase, 0), true)
    }
}

/// The per-timebase nested lock plus its record.
pub type TimeBaseCell = Arc<ReentrantMutex<RefCell<TimeBaseEntry>>>;

/// Introspection view of a timebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBaseStatus {
    pub nominal_start_time: u32,
    pub nominal_interval_time: u32,
    pub accuracy_usec: u32,
    pub external_sync: bool,
    pub freerun_time: u32,
    pub sync_warnings: u32,
}

/// Everything the platform needs to start a helper thread.
pub struct HelperSpawn {
    pub cell: TimeBaseCell,
    /// Yields the published identifier once creation finalizes; closes
    /// without a value when creation fails, in which case the helper must
    /// exit without touching the entry.
    pub startup: Receiver<ObjectId>,
    pub sync: Box<dyn SyncSource>,
}

/// Host-kernel services the timebase core consumes.
pub trait TimeBasePlatform: Send + Sync {
    /// Identity of the calling task; `UNDEFINED` for unregistered threads,
    /// a TIMEBASE-class identifier for timebase helper threads.
    fn current_task_id(&self) -> ObjectId;

    /// Start the helper thread for a new timebase.
    fn spawn_helper(&self, spawn: HelperSpawn) -> OsalResult<()>;

    /// Build the internal tick source for an internally synchronized
    /// timebase slot.
    fn internal_source(&self, index: usize) -> OsalResult<Box<dyn SyncSource>>;

    /// Reconfigure the internal tick source for a slot.
    fn internal_set(&self, index: usize, start_ticks: u32, interval_ticks: u32) -> OsalResult<()>;

    /// Tear down the internal tick source for a slot.
    fn internal_clear(&self, index: usize);
}

/// Timebase and timer-callback subsystem.
pub struct TimeBaseCore {
    objects: Arc<ObjectTables>,
    entries: Box<[TimeBaseCell]>,
    /// Owning timebase for each global TIMECB index.
    timer_owners: Mutex<Box<[ObjectId]>>,
}

impl TimeBaseCore {
    pub fn new(objects: Arc<ObjectTables>) -> TimeBaseCore {
        TimeBaseCore {
            objects,
            entries: (0..config::MAX_TIMEBASES)
                .map(|_| Arc::new(ReentrantMutex::new(RefCell::new(TimeBaseEntry::vacant()))))
                .collect(),
            timer_owners: Mutex::new(
                (0..config::MAX_TIMECBS)
                    .map(|_| ObjectId::UNDEFINED)
                    .collect(),
            ),
        }
    }

    #[inline(always)]
    pub(crate) fn objects(&self) -> &ObjectTables {
        &self.objects
    }

    #[inline(always)]
    pub(crate) fn entry_cell(&self, index: usize) -> &TimeBaseCell {
        &self.entries[index]
    }

    pub(crate) fn timer_owner(&self, index: usize) -> ObjectId {
        self.timer_owners.lock()[index]
    }

    pub(crate) fn set_timer_owner(&self, index: usize, owner: ObjectId) {
        self.timer_owners.lock()[index] = owner;
    }

    /// Reject configuration calls arriving from a timebase helper thread
    /// (directly or from inside a dispatched callback).
    pub(crate) fn reject_helper_caller(&self, platform: &dyn TimeBasePlatform) -> OsalResult<()> {
        if platform.current_task_id().class() == Some(ObjectClass::TimeBase) {
            return Err(OsalError::IncorrectObjState);
        }
        Ok(())
    }

    /// Create a timebase and start its helper thread.
    ///
    /// With `external_sync` the helper blocks in the supplied source and
    /// the advertised accuracy is zero; otherwise the platform's internal
    /// interval ticker drives it at [`config::MICROSECS_PER_TICK`] accuracy.
    pub fn create(
        &self,
        platform: &dyn TimeBasePlatform,
        name: &str,
        external_sync: Option<Box<dyn SyncSource>>,
    ) -> OsalResult<ObjectId> {
        let creator = platform.current_task_id();
        let res = self
            .objects
            .allocate_new(ObjectClass::TimeBase, name, creator)?;
        let index = res.index();
        let pending = res.pending_id();
        let is_external = external_sync.is_some();

        let sync: Box<dyn SyncSource> = match external_sync {
            Some(source) => source,
            None => match platform.internal_source(index) {
                Ok(source) => source,
                Err(e) => return res.finalize(Err(e)),
            },
        };

        {
            let guard = self.entries[index].lock();
            *guard.borrow_mut() = TimeBaseEntry::bound(pending, is_external);
        }

        let (publish, startup) = crossbeam_channel::bounded(1);
        let spawn = HelperSpawn {
            cell: Arc::clone(&self.entries[index]),
            startup,
            sync,
        };
        if let Err(e) = platform.spawn_helper(spawn) {
            {
                let guard = self.entries[index].lock();
                *guard.borrow_mut() = TimeBaseEntry::vacant();
            }
            if !is_external {
                platform.internal_clear(index);
            }
            return res.finalize(Err(e));
        }

        let id = res.finalize(Ok(()))?;
        // The helper is parked on this handshake until the identifier is
        // public.
        let _ = publish.send(id);
        Ok(id)
    }

    /// Reconfigure an internally synchronized timebase.
    pub fn set(
        &self,
        platform: &dyn TimeBasePlatform,
        id: ObjectId,
        start_ticks: u32,
        interval_ticks: u32,
    ) -> OsalResult<()> {
        if start_ticks >= config::TICK_ARG_LIMIT || interval_ticks >= config::TICK_ARG_LIMIT {
            return Err(OsalError::TimerInvalidArgs);
        }
        self.reject_helper_caller(platform)?;
        let locked = self.objects.get_global(ObjectClass::TimeBase, id)?;
        let index = locked.token().index;
        let guard = self.entries[index].lock();
        let mut entry = guard.borrow_mut();
        if entry.external_sync {
            // An external source cannot be retuned from here.
            return Err(OsalError::IncorrectObjState);
        }
        platform.internal_set(index, start_ticks, interval_ticks)?;
        entry.nominal_start_time = start_ticks;
        entry.nominal_interval_time = interval_ticks;
        Ok(())
    }

    /// Delete a timebase.
    ///
    /// Clears the entry's bound identifier under the per-timebase lock;
    /// the helper observes the mismatch at its next wake and exits before
    /// dispatching anything further.
    pub fn delete(&self, platform: &dyn TimeBasePlatform, id: ObjectId) -> OsalResult<()> {
        self.reject_helper_caller(platform)?;
        let locked = self.objects.get_exclusive(ObjectClass::TimeBase, id)?;
        let index = locked.token().index;
        {
            let guard = self.entries[index].lock();
            let mut entry = guard.borrow_mut();
            entry.bound_id = ObjectId::UNDEFINED;
            entry.first_cb = None;
            entry.timers.clear();
        }
        platform.internal_clear(index);
        locked.finalize_delete(Ok(()))
    }

    /// Introspect a live timebase.
    pub fn status(&self, id: ObjectId) -> OsalResult<TimeBaseStatus> {
        let token = self.objects.check_id(ObjectClass::TimeBase, id)?;
        let guard = self.entries[token.index].lock();
        let entry = guard.borrow();
        if entry.bound_id != id {
            return Err(OsalError::InvalidId);
        }
        Ok(TimeBaseStatus {
            nominal_start_time: entry.nominal_start_time,
            nominal_interval_time: entry.nominal_interval_time,
            accuracy_usec: entry.accuracy_usec,
            external_sync: entry.external_sync,
            freerun_time: entry.freerun_time,
            sync_warnings: entry.sync_warnings,
        })
    }

    /// Total ticks serviced by a live timebase.
    pub fn free_run(&self, id: ObjectId) -> OsalResult<u32> {
        Ok(self.status(id)?.freerun_time)
    }
}

/// Body of a timebase helper thread.
///
/// The host's spawned thread receives the published identifier over the
/// startup channel, registers it as the thread's task identity, and then
/// runs this loop until the timebase is deleted.
pub fn run_helper(cell: TimeBaseCell, bound_id: ObjectId, mut sync: Box<dyn SyncSource>) {
    let mut zero_streak = 0u32;
    let mut warned = false;
    loop {
        let tick_time = sync.wait_for_tick();

        let mut emit_warning = false;
        if tick_time == 0 {
            zero_streak += 1;
            if zero_streak == SYNC_SPIN_LIMIT && !warned {
                warned = true;
                emit_warning = true;
                tracing::warn!(
                    timebase = %bound_id,
                    streak = zero_streak,
                    "timebase sync source is providing no ticks; backing off"
                );
            }
        } else {
            zero_streak = 0;
            warned = false;
        }

        {
            let guard = cell.lock();
            {
                let mut entry = guard.borrow_mut();
                if entry.bound_id != bound_id {
                    // Deleted while we were blocked in the sync source.
                    return;
                }
                if emit_warning {
                    entry.sync_warnings = entry.sync_warnings.saturating_add(1);
                }
            }
            if tick_time > 0 {
                service_ticks(&guard, tick_time);
            }
        }

        if tick_time == 0 {
            std::thread::sleep(Duration::from_millis(SYNC_BACKOFF_MS));
        }
    }
}

/// Account `tick_time` ticks against a timebase and dispatch due callbacks.
///
/// Caller holds the per-timebase lock. The record borrow is dropped around
/// every callback invocation so callbacks can re-enter the timer API; the
/// traversal link is saved before dispatch so a callback may unlink any
/// node, itself included.
pub(crate) fn service_ticks(tb: &RefCell<TimeBaseEntry>, tick_time: u32) {
    {
        let mut entry = tb.borrow_mut();
        entry.freerun_time = entry.freerun_time.wrapping_add(tick_time);
    }

    let start = match tb.borrow().first_cb {
        Some(index) => index,
        None => return,
    };
    let mut cursor = start;
    for _ in 0..config::MAX_TIMECBS {
        let mut dispatch = None;
        let next;
        {
            let mut entry = tb.borrow_mut();
            let Some(slot) = entry.timers.get_mut(cursor) else {
                // The node we were headed for was unlinked mid-traversal.
                return;
            };
            next = slot.next;

            let saved = slot.wait_time;
            slot.wait_time -= tick_time as i64;
            if slot.interval_time > 0 {
                if saved > 0 {
                    if slot.wait_time <= 0 {
                        // Crossing fire. Starvation beyond one full
                        // interval is clamped and counted rather than
                        // replayed.
                        if slot.wait_time < -slot.interval_time {
                            slot.wait_time = -slot.interval_time;
                            slot.backlog_resets = slot.backlog_resets.saturating_add(1);
                        }
                        dispatch = Some((slot.callback.clone(), slot.id));
                    }
                } else {
                    // Backlogged: consume whole intervals without
                    // dispatching until the counter is positive again.
                    while slot.wait_time <= 0 {
                        slot.wait_time += slot.interval_time;
                    }
                }
            } else if saved > 0 && slot.wait_time <= 0 {
                // One-shot: fires only on the positive-to-nonpositive
                // transition, at most once per arm.
                dispatch = Some((slot.callback.clone(), slot.id));
            }
        }
        if let Some((callback, id)) = dispatch {
            callback(id);
        }
        if next == start {
            return;
        }
        cursor = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerCallback, TimerSlot};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counted() -> (Arc<AtomicU32>, TimerCallback) {
        let count = Arc::new(AtomicU32::new(0));
        let cb_count = Arc::clone(&count);
        let callback: TimerCallback = Arc::new(move |_| {
            cb_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    fn armed_entry(interval: i64, initial: i64) -> (RefCell<TimeBaseEntry>, Arc<AtomicU32>) {
        let mut entry = TimeBaseEntry::bound_for_test();
        let (count, callback) = counted();
        entry.link_timer(
            0,
            TimerSlot {
                id: ObjectId::compose(ObjectClass::TimerCb, 0),
                wait_time: initial,
                interval_time: interval,
                backlog_resets: 0,
                callback,
                next: 0,
            },
        );
        (RefCell::new(entry), count)
    }

    fn slot_state(tb: &RefCell<TimeBaseEntry>) -> (i64, u32) {
        let entry = tb.borrow();
        let slot = entry.timers.get(0).unwrap();
        (slot.wait_time, slot.backlog_resets)
    }

    #[test]
    fn test_periodic_fires_every_interval() {
        // interval=10, initial=10, thirty +1 ticks: fires on ticks 10, 20,
        // and 30, with no backlog events.
        let (tb, count) = armed_entry(10, 10);
        for _ in 0..30 {
            service_ticks(&tb, 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(tb.borrow().freerun_time, 30);
        let (_, resets) = slot_state(&tb);
        assert_eq!(resets, 0);
    }

    #[test]
    fn test_starved_tick_clamps_backlog_and_fires_once() {
        // One +25 tick against interval=10/initial=10: a single dispatch,
        // one backlog clamp, wait parked at exactly -interval.
        let (tb, count) = armed_entry(10, 10);
        service_ticks(&tb, 25);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tb.borrow().freerun_time, 25);
        assert_eq!(slot_state(&tb), (-10, 1));
    }

    #[test]
    fn test_backlog_recovery_resumes_the_period() {
        let (tb, count) = armed_entry(10, 10);
        service_ticks(&tb, 25);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Subsequent normal ticks consume the clamped backlog without
        // firing, then the period resumes.
        for _ in 0..10 {
            service_ticks(&tb, 1);
        }
        let (wait, resets) = slot_state(&tb);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(resets, 1);
        assert!(wait > 0, "backlog must drain back to a positive wait");
        // Drive until the next fire to prove the timer is still periodic.
        for _ in 0..wait {
            service_ticks(&tb, 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_triple_interval_tick_fires_at_most_twice() {
        let (tb, count) = armed_entry(10, 10);
        service_ticks(&tb, 30);
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 1 && fired <= 2, "fired {fired} times");
        let (_, resets) = slot_state(&tb);
        assert!(resets >= 1);
    }

    #[test]
    fn test_one_shot_fires_exactly_once() {
        let (tb, count) = armed_entry(0, 5);
        for _ in 0..10 {
            service_ticks(&tb, 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_shot_survives_oversized_tick() {
        let (tb, count) = armed_entry(0, 5);
        service_ticks(&tb, 100);
        service_ticks(&tb, 100);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dormant_timer_never_fires() {
        // initial=0 means not armed: the positive-to-nonpositive
        // transition can never happen.
        let (tb, count) = armed_entry(0, 0);
        for _ in 0..10 {
            service_ticks(&tb, 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_freerun_wraps_without_panicking() {
        let (tb, _) = armed_entry(10, 10);
        tb.borrow_mut().freerun_time = u32::MAX;
        service_ticks(&tb, 2);
        assert_eq!(tb.borrow().freerun_time, 1);
    }

    #[test]
    fn test_all_ring_members_are_serviced() {
        let mut entry = TimeBaseEntry::bound_for_test();
        let mut counts = Vec::new();
        for index in 0..3 {
            let (count, callback) = counted();
            counts.push(count);
            entry.link_timer(
                index,
                TimerSlot {
                    id: ObjectId::compose(ObjectClass::TimerCb, index as u32),
                    wait_time: 1,
                    interval_time: 1,
                    backlog_resets: 0,
                    callback,
                    next: index,
                },
            );
        }
        let tb = RefCell::new(entry);
        service_ticks(&tb, 1);
        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_callback_may_unlink_nodes_mid_traversal() {
        // A callback that unlinks other ring members while the walk is in
        // flight: the traversal saved its link first, hits the gap, and
        // stops cleanly. The callback re-locks the cell reentrantly, the
        // same way a real callback calling timer_delete would.
        let cell: TimeBaseCell = Arc::new(ReentrantMutex::new(RefCell::new(
            TimeBaseEntry::bound_for_test(),
        )));
        let (count_a, _) = counted();
        let count_a_cb = Arc::clone(&count_a);
        let cell_for_cb = Arc::clone(&cell);
        let destructive: TimerCallback = Arc::new(move |_| {
            count_a_cb.fetch_add(1, Ordering::SeqCst);
            let guard = cell_for_cb.lock();
            let mut entry = guard.borrow_mut();
            entry.unlink_timer(1);
            entry.unlink_timer(2);
        });
        let (count_b, passive) = counted();
        {
            let guard = cell.lock();
            let mut entry = guard.borrow_mut();
            entry.link_timer(
                0,
                TimerSlot {
                    id: ObjectId::compose(ObjectClass::TimerCb, 0),
                    wait_time: 1,
                    interval_time: 1,
                    backlog_resets: 0,
                    callback: destructive,
                    next: 0,
                },
            );
            for index in [1usize, 2] {
                entry.link_timer(
                    index,
                    TimerSlot {
                        id: ObjectId::compose(ObjectClass::TimerCb, index as u32),
                        wait_time: 1,
                        interval_time: 1,
                        backlog_resets: 0,
                        callback: passive.clone(),
                        next: index,
                    },
                );
            }
        }
        let guard = cell.lock();
        service_ticks(&guard, 1);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        // The unlinked members were never dispatched and the walk did not
        // revisit or loop.
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }
}
