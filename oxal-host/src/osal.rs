// oxal-host: The Osal facade
// Wires the core tables, the hosted platform, and the primitive state
// tables into one surface. Every create follows allocate -> populate ->
// finalize with the class lock held throughout; every delete follows
// exclusive get -> primitive teardown -> finalize.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use oxal_core::config::{self, MAX_BINSEMS, MAX_COUNTSEMS, MAX_MUTEXES, MAX_QUEUES, MAX_TASKS};
use oxal_core::{
    ObjectClass, ObjectId, ObjectTables, OsalError, OsalResult, SyncSource, TimeBaseCore,
    TimeBaseStatus, Timeout, TimerCallback, TimerStatus,
};

use crate::binsem::HostBinSem;
use crate::countsem::HostCountSem;
use crate::identity;
use crate::mutexsem::HostMutex;
use crate::platform::HostPlatform;
use crate::queue::HostQueue;
use crate::slots::SlotTable;

/// Teardown sweeps before remaining objects are abandoned.
const TEARDOWN_PASSES: usize = 5;

/// Pause between teardown sweeps, giving dependent objects a chance to
/// resolve their references.
const TEARDOWN_PAUSE_MS: u64 = 10;

/// Introspection view of a hosted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    pub creator: ObjectId,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskMeta {
    priority: u8,
}

struct OsalInner {
    objects: Arc<ObjectTables>,
    timebases: TimeBaseCore,
    platform: HostPlatform,
    binsems: SlotTable<HostBinSem>,
    countsems: SlotTable<HostCountSem>,
    mutexes: SlotTable<HostMutex>,
    queues: SlotTable<HostQueue>,
    task_meta: Mutex<Vec<TaskMeta>>,
}

/// The hosted abstraction layer instance.
///
/// Cheap to clone; clones share one set of tables. Most deployments build
/// exactly one at startup and tear it down with
/// [`Osal::delete_all_objects`].
#[derive(Clone)]
pub struct Osal {
    inner: Arc<OsalInner>,
}

impl Osal {
    pub fn new() -> OsalResult<Osal> {
        config::validate_clock_config()?;
        let objects = Arc::new(ObjectTables::new());
        Ok(Osal {
            inner: Arc::new(OsalInner {
                timebases: TimeBaseCore::new(Arc::clone(&objects)),
                objects,
                platform: HostPlatform::new(),
                binsems: SlotTable::new(MAX_BINSEMS),
                countsems: SlotTable::new(MAX_COUNTSEMS),
                mutexes: SlotTable::new(MAX_MUTEXES),
                queues: SlotTable::new(MAX_QUEUES),
                task_meta: Mutex::new(vec![TaskMeta::default(); MAX_TASKS]),
            }),
        })
    }

    /// Shared access to the core tables, for callers layering their own
    /// primitives on the manager.
    pub fn tables(&self) -> &ObjectTables {
        &self.inner.objects
    }

    /// Identity of the calling thread; `UNDEFINED` for threads not created
    /// through this layer.
    pub fn current_task_id(&self) -> ObjectId {
        identity::current_task_id()
    }

    /// Resolve a name to an identifier within one class.
    pub fn get_id_by_name(&self, class: ObjectClass, name: &str) -> OsalResult<ObjectId> {
        Ok(self
            .inner
            .objects
            .get_by_name(oxal_core::LockMode::None, class, name)?
            .token()
            .id)
    }

    /// Number of live objects across every class.
    pub fn object_count(&self) -> usize {
        self.inner.objects.active_count()
    }

    // ----------------------------------------------------------------
    // Timebases and timers
    // ----------------------------------------------------------------

    /// Create a timebase. `external_sync` of `None` installs the host's
    /// internal interval ticker (armed later via [`Osal::time_base_set`]).
    pub fn time_base_create(
        &self,
        name: &str,
        external_sync: Option<Box<dyn SyncSource>>,
    ) -> OsalResult<ObjectId> {
        self.inner
            .timebases
            .create(&self.inner.platform, name, external_sync)
    }

    pub fn time_base_set(
        &self,
        id: ObjectId,
        start_ticks: u32,
        interval_ticks: u32,
    ) -> OsalResult<()> {
        self.inner
            .timebases
            .set(&self.inner.platform, id, start_ticks, interval_ticks)
    }

    pub fn time_base_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.inner.timebases.delete(&self.inner.platform, id)
    }

    pub fn time_base_status(&self, id: ObjectId) -> OsalResult<TimeBaseStatus> {
        self.inner.timebases.status(id)
    }

    pub fn time_base_free_run(&self, id: ObjectId) -> OsalResult<u32> {
        self.inner.timebases.free_run(id)
    }

    /// Arm a callback on a timebase. The callback receives its own
    /// identifier and runs on the helper thread with the per-timebase lock
    /// held; it may call [`Osal::timer_set`] / [`Osal::timer_delete`], but
    /// [`Osal::timer_add`] and the timebase-level calls are refused from
    /// that context.
    pub fn timer_add(
        &self,
        name: &str,
        timebase_id: ObjectId,
        interval_ticks: u32,
        initial_wait_ticks: u32,
        callback: TimerCallback,
    ) -> OsalResult<ObjectId> {
        self.inner.timebases.timer_add(
            &self.inner.platform,
            name,
            timebase_id,
            interval_ticks,
            initial_wait_ticks,
            callback,
        )
    }

    pub fn timer_set(
        &self,
        id: ObjectId,
        initial_wait_ticks: u32,
        interval_ticks: u32,
    ) -> OsalResult<()> {
        self.inner.timebases.timer_set(id, initial_wait_ticks, interval_ticks)
    }

    pub fn timer_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.inner.timebases.timer_delete(id)
    }

    pub fn timer_status(&self, id: ObjectId) -> OsalResult<TimerStatus> {
        self.inner.timebases.timer_status(id)
    }

    // ----------------------------------------------------------------
    // Binary semaphores
    // ----------------------------------------------------------------

    pub fn bin_sem_create(&self, name: &str, initial: bool) -> OsalResult<ObjectId> {
        let res =
            self.inner
                .objects
                .allocate_new(ObjectClass::BinSem, name, identity::current_task_id())?;
        self.inner.binsems.install(res.index(), HostBinSem::new(initial));
        res.finalize(Ok(()))
    }

    pub fn bin_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        self.binsem(id)?.give();
        Ok(())
    }

    pub fn bin_sem_take(&self, id: ObjectId, timeout: Timeout) -> OsalResult<()> {
        self.binsem(id)?.take(timeout)
    }

    /// Release every waiter currently blocked on the semaphore.
    pub fn bin_sem_flush(&self, id: ObjectId) -> OsalResult<()> {
        self.binsem(id)?.flush();
        Ok(())
    }

    pub fn bin_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        let locked = self.inner.objects.get_exclusive(ObjectClass::BinSem, id)?;
        if let Some(sem) = self.inner.binsems.take(locked.token().index) {
            sem.invalidate();
        }
        locked.finalize_delete(Ok(()))
    }

    fn binsem(&self, id: ObjectId) -> OsalResult<Arc<HostBinSem>> {
        let token = self.inner.objects.check_id(ObjectClass::BinSem, id)?;
        self.inner.binsems.get(token.index).ok_or(OsalError::InvalidId)
    }

    // ----------------------------------------------------------------
    // Counting semaphores
    // ----------------------------------------------------------------

    pub fn count_sem_create(&self, name: &str, initial: u32) -> OsalResult<ObjectId> {
        let res = self.inner.objects.allocate_new(
            ObjectClass::CountSem,
            name,
            identity::current_task_id(),
        )?;
        self.inner
            .countsems
            .install(res.index(), HostCountSem::new(initial));
        res.finalize(Ok(()))
    }

    pub fn count_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        self.countsem(id)?.give();
        Ok(())
    }

    pub fn count_sem_take(&self, id: ObjectId, timeout: Timeout) -> OsalResult<()> {
        self.countsem(id)?.take(timeout)
    }

    pub fn count_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        let locked = self
            .inner
            .objects
            .get_exclusive(ObjectClass::CountSem, id)?;
        if let Some(sem) = self.inner.countsems.take(locked.token().index) {
            sem.invalidate();
        }
        locked.finalize_delete(Ok(()))
    }

    fn countsem(&self, id: ObjectId) -> OsalResult<Arc<HostCountSem>> {
        let token = self.inner.objects.check_id(ObjectClass::CountSem, id)?;
        self.inner
            .countsems
            .get(token.index)
            .ok_or(OsalError::InvalidId)
    }

    // ----------------------------------------------------------------
    // Mutex semaphores
    // ----------------------------------------------------------------

    pub fn mut_sem_create(&self, name: &str) -> OsalResult<ObjectId> {
        let res =
            self.inner
                .objects
                .allocate_new(ObjectClass::Mutex, name, identity::current_task_id())?;
        self.inner.mutexes.install(res.index(), HostMutex::new());
        res.finalize(Ok(()))
    }

    pub fn mut_sem_take(&self, id: ObjectId) -> OsalResult<()> {
        self.mutexsem(id)?.take();
        Ok(())
    }

    pub fn mut_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        self.mutexsem(id)?.give()
    }

    pub fn mut_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        let locked = self.inner.objects.get_exclusive(ObjectClass::Mutex, id)?;
        let index = locked.token().index;
        if let Some(mutex) = self.inner.mutexes.get(index) {
            if mutex.is_held() {
                return Err(OsalError::IncorrectObjState);
            }
        }
        let _ = self.inner.mutexes.take(index);
        locked.finalize_delete(Ok(()))
    }

    fn mutexsem(&self, id: ObjectId) -> OsalResult<Arc<HostMutex>> {
        let token = self.inner.objects.check_id(ObjectClass::Mutex, id)?;
        self.inner
            .mutexes
            .get(token.index)
            .ok_or(OsalError::InvalidId)
    }

    // ----------------------------------------------------------------
    // Message queues
    // ----------------------------------------------------------------

    pub fn queue_create(
        &self,
        name: &str,
        depth: usize,
        max_msg_size: usize,
    ) -> OsalResult<ObjectId> {
        let res =
            self.inner
                .objects
                .allocate_new(ObjectClass::Queue, name, identity::current_task_id())?;
        let queue = match HostQueue::new(depth, max_msg_size) {
            Ok(queue) => queue,
            Err(e) => return res.finalize(Err(e)),
        };
        self.inner.queues.install(res.index(), queue);
        res.finalize(Ok(()))
    }

    pub fn queue_put(&self, id: ObjectId, message: &[u8]) -> OsalResult<()> {
        self.queue(id)?.put(message)
    }

    pub fn queue_get(&self, id: ObjectId, timeout: Timeout) -> OsalResult<Vec<u8>> {
        self.queue(id)?.get(timeout)
    }

    pub fn queue_delete(&self, id: ObjectId) -> OsalResult<()> {
        let locked = self.inner.objects.get_exclusive(ObjectClass::Queue, id)?;
        if let Some(queue) = self.inner.queues.take(locked.token().index) {
            queue.invalidate();
        }
        locked.finalize_delete(Ok(()))
    }

    fn queue(&self, id: ObjectId) -> OsalResult<Arc<HostQueue>> {
        let token = self.inner.objects.check_id(ObjectClass::Queue, id)?;
        self.inner
            .queues
            .get(token.index)
            .ok_or(OsalError::InvalidId)
    }

    // ----------------------------------------------------------------
    // Tasks
    // ----------------------------------------------------------------

    /// Spawn a task. The thread registers its identifier before running
    /// `entry` and reaps its own record when `entry` returns.
    pub fn task_create<F>(&self, name: &str, priority: u8, entry: F) -> OsalResult<ObjectId>
    where
        F: FnOnce() + Send + 'static,
    {
        let res =
            self.inner
                .objects
                .allocate_new(ObjectClass::Task, name, identity::current_task_id())?;
        let index = res.index();

        let (publish, startup) = crossbeam_channel::bounded::<ObjectId>(1);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("oxal-{name}"))
            .spawn(move || {
                // Parked until the identifier is public; a closed channel
                // means creation failed after spawn.
                let id = match startup.recv() {
                    Ok(id) => id,
                    Err(_) => return,
                };
                identity::register_current(id);
                entry();
                identity::clear_current();
                // Self-reap: the slot frees once the task body returns.
                if let Ok(locked) = inner.objects.get_exclusive(ObjectClass::Task, id) {
                    let _ = locked.finalize_delete(Ok(()));
                }
            });

        match spawned {
            Ok(_) => {
                self.inner.task_meta.lock()[index] = TaskMeta { priority };
                let id = res.finalize(Ok(()))?;
                let _ = publish.send(id);
                Ok(id)
            }
            Err(_) => res.finalize(Err(OsalError::Error)),
        }
    }

    pub fn task_info(&self, id: ObjectId) -> OsalResult<TaskInfo> {
        let record = self.inner.objects.snapshot(ObjectClass::Task, id)?;
        let index = self
            .inner
            .objects
            .check_id(ObjectClass::Task, id)?
            .index;
        let meta = self.inner.task_meta.lock()[index];
        Ok(TaskInfo {
            name: record.name.as_str().to_string(),
            creator: record.creator,
            priority: meta.priority,
        })
    }

    /// The hosted kernel cannot cancel a running thread; live tasks refuse
    /// deletion and exit by returning from their entry function.
    pub fn task_delete(&self, id: ObjectId) -> OsalResult<()> {
        let _ = self.inner.objects.check_id(ObjectClass::Task, id)?;
        Err(OsalError::Error)
    }

    // ----------------------------------------------------------------
    // Teardown
    // ----------------------------------------------------------------

    /// Delete one object, dispatching on its class tag.
    pub fn delete_by_id(&self, id: ObjectId) -> OsalResult<()> {
        match id.class() {
            Some(ObjectClass::Queue) => self.queue_delete(id),
            Some(ObjectClass::BinSem) => self.bin_sem_delete(id),
            Some(ObjectClass::CountSem) => self.count_sem_delete(id),
            Some(ObjectClass::Mutex) => self.mut_sem_delete(id),
            Some(ObjectClass::TimeBase) => self.time_base_delete(id),
            Some(ObjectClass::TimerCb) => self.timer_delete(id),
            Some(ObjectClass::Task) => self.task_delete(id),
            // Classes with no hosted primitive state: clear the record.
            Some(class) => self
                .inner
                .objects
                .get_exclusive(class, id)?
                .finalize_delete(Ok(())),
            None => Err(OsalError::InvalidId),
        }
    }

    /// Delete everything, sweeping up to five times.
    ///
    /// Dependent objects can hold references that only resolve once their
    /// siblings are gone, so a failed delete in one pass may succeed in the
    /// next. Whatever survives the final pass is leaked and reported.
    pub fn delete_all_objects(&self) -> OsalResult<()> {
        for pass in 0..TEARDOWN_PASSES {
            if pass > 0 {
                thread::sleep(Duration::from_millis(TEARDOWN_PAUSE_MS));
            }
            self.inner.objects.for_each(None, None, |id| {
                if let Err(e) = self.delete_by_id(id) {
                    tracing::debug!(id = %id, error = %e, "teardown delete failed; will retry");
                }
            });
            let remaining = self.inner.objects.active_count();
            if remaining == 0 {
                tracing::debug!(passes = pass + 1, "teardown complete");
                return Ok(());
            }
        }
        let remaining = self.inner.objects.active_count();
        if remaining == 0 {
            return Ok(());
        }
        tracing::warn!(remaining, "teardown abandoned; leaking remaining objects");
        Err(OsalError::ObjectsOutstanding { remaining })
    }
}
