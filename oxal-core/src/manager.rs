// oxal-core: The object identifier manager
// Allocation, lookup, refcounting, and the locked create/delete handoff
// pattern every primitive is layered on. The "leave the class locked"
// contracts are carried by RAII guards so an unlock can never be forgotten.

use parking_lot::MutexGuard;

use crate::id::{self, ObjectClass, ObjectId, CLASS_COUNT};
use crate::record::{ObjectName, ObjectRecord, RecordFlags};
use crate::status::{OsalError, OsalResult};
use crate::table::ClassTable;

/// Synchronization contract chosen by a caller on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Validate only; no lock held on return. The caller gets an index and
    /// no guarantee against concurrent deletion; hot paths to primitives
    /// that carry their own synchronization use this.
    None,
    /// Leave the class locked; the caller releases by dropping the accessor.
    Global,
    /// Wait until the slot's refcount drains, then leave the class locked.
    /// Delete paths use this.
    Exclusive,
    /// Take a shared reference: bump the refcount and release the lock.
    /// Must be paired with [`ObjectTables::refcount_decr`].
    RefCount,
}

/// Validated, unlocked handle to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectToken {
    pub class: ObjectClass,
    pub id: ObjectId,
    pub index: usize,
}

/// A slot reserved by [`ObjectTables::allocate_new`], with the class lock
/// still held. Must be consumed by [`Reservation::finalize`]; dropping it
/// un-finalized returns the slot to the free state.
pub struct Reservation<'a> {
    guard: MutexGuard<'a, Vec<ObjectRecord>>,
    class: ObjectClass,
    index: usize,
    committed: bool,
}

impl Reservation<'_> {
    #[inline(always)]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Slot index the platform create call should populate.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record(&self) -> &ObjectRecord {
        &self.guard[self.index]
    }

    /// The identifier [`Reservation::finalize`] will publish on success.
    ///
    /// Deterministic because the class lock is held: nothing else can touch
    /// the slot's serial between this call and finalization.
    pub fn pending_id(&self) -> ObjectId {
        let stepped = id::next_serial(self.guard[self.index].serial, self.class.capacity());
        ObjectId::compose(self.class, stepped)
    }

    /// Complete the create handoff.
    ///
    /// On `Ok` the slot's generation advances, the fresh identifier is
    /// published, and it is returned. On `Err` the slot is cleared back to
    /// free and the platform status is propagated. The class lock is
    /// released either way.
    pub fn finalize(mut self, op_status: OsalResult<()>) -> OsalResult<ObjectId> {
        match op_status {
            Ok(()) => {
                let capacity = self.class.capacity();
                let rec = &mut self.guard[self.index];
                rec.serial = id::next_serial(rec.serial, capacity);
                let fresh = ObjectId::compose(self.class, rec.serial);
                rec.active_id = fresh;
                self.committed = true;
                Ok(fresh)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard[self.index].clear();
        }
    }
}

/// A slot held under the class lock (`Global` or `Exclusive` mode).
///
/// Dropping releases the lock; `Exclusive` accessors also shed `EXCL_REQ`
/// on drop so an abandoned delete cannot wedge the slot.
pub struct LockedObject<'a> {
    guard: MutexGuard<'a, Vec<ObjectRecord>>,
    token: ObjectToken,
    exclusive: bool,
}

impl LockedObject<'_> {
    #[inline(always)]
    pub fn token(&self) -> ObjectToken {
        self.token
    }

    pub fn record(&self) -> &ObjectRecord {
        &self.guard[self.token.index]
    }

    pub fn record_mut(&mut self) -> &mut ObjectRecord {
        &mut self.guard[self.token.index]
    }

    /// Complete the delete handoff.
    ///
    /// On `Ok` the record is cleared back to free (the refcount is already
    /// zero under the `Exclusive` contract). The class lock is released
    /// unconditionally.
    pub fn finalize_delete(mut self, op_status: OsalResult<()>) -> OsalResult<()> {
        let rec = &mut self.guard[self.token.index];
        rec.flags.remove(RecordFlags::EXCL_REQ);
        match op_status {
            Ok(()) => {
                debug_assert_eq!(rec.refcount, 0);
                rec.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockedObject<'_> {
    fn drop(&mut self) {
        if self.exclusive {
            self.guard[self.token.index]
                .flags
                .remove(RecordFlags::EXCL_REQ);
        }
    }
}

/// Result of a lookup: either a validated unlocked token or an accessor
/// that still holds the class lock, depending on the requested mode.
pub enum ObjectAccess<'a> {
    Unlocked(ObjectToken),
    Locked(LockedObject<'a>),
}

impl<'a> ObjectAccess<'a> {
    pub fn token(&self) -> ObjectToken {
        match self {
            ObjectAccess::Unlocked(t) => *t,
            ObjectAccess::Locked(l) => l.token(),
        }
    }

    fn expect_unlocked(self) -> ObjectToken {
        match self {
            ObjectAccess::Unlocked(t) => t,
            // Only reachable through a caller-side mode mix-up inside this
            // crate; the typed wrappers keep modes and variants paired.
            ObjectAccess::Locked(l) => l.token(),
        }
    }

    fn expect_locked(self) -> OsalResult<LockedObject<'a>> {
        match self {
            ObjectAccess::Locked(l) => Ok(l),
            ObjectAccess::Unlocked(_) => Err(OsalError::Error),
        }
    }
}

/// The process-wide partitioned resource table: one [`ClassTable`] per class.
pub struct ObjectTables {
    tables: [ClassTable; CLASS_COUNT],
}

impl Default for ObjectTables {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTables {
    pub fn new() -> ObjectTables {
        ObjectTables {
            tables: ObjectClass::ALL.map(ClassTable::new),
        }
    }

    #[inline(always)]
    fn table(&self, class: ObjectClass) -> &ClassTable {
        &self.tables[class.ordinal()]
    }

    /// Reserve a free slot in `class` under the given name.
    ///
    /// Returns with the class lock held; the caller populates its
    /// class-specific state, invokes the platform create, and finishes with
    /// [`Reservation::finalize`]. Name uniqueness is enforced against every
    /// non-free slot in the class.
    pub fn allocate_new<'a>(
        &'a self,
        class: ObjectClass,
        name: &str,
        creator: ObjectId,
    ) -> OsalResult<Reservation<'a>> {
        if name.is_empty() {
            return Err(OsalError::InvalidPointer);
        }
        let name = ObjectName::from(name).map_err(|_| OsalError::NameTooLong)?;

        let mut guard = self.table(class).lock();
        if guard
            .iter()
            .any(|r| !r.is_free() && r.name.as_str() == name.as_str())
        {
            return Err(OsalError::NameTaken);
        }
        let index = guard
            .iter()
            .position(ObjectRecord::is_free)
            .ok_or(OsalError::NoFreeIds)?;

        let rec = &mut guard[index];
        rec.active_id = ObjectId::RESERVED;
        rec.name = name;
        rec.creator = creator;
        rec.refcount = 0;
        rec.flags = RecordFlags::empty();

        Ok(Reservation {
            guard,
            class,
            index,
            committed: false,
        })
    }

    /// Look up a live object by identifier under the requested lock mode.
    pub fn get_by_id(
        &self,
        mode: LockMode,
        class: ObjectClass,
        id: ObjectId,
    ) -> OsalResult<ObjectAccess<'_>> {
        let index = id::array_index(class, id)?;
        let table = self.table(class);
        let guard = table.lock();
        if guard[index].active_id != id {
            return Err(OsalError::InvalidId);
        }
        self.escalate(table, guard, ObjectToken { class, id, index }, mode)
    }

    /// Look up by name; `NAME_NOT_FOUND` when no active slot matches.
    pub fn get_by_name(
        &self,
        mode: LockMode,
        class: ObjectClass,
        name: &str,
    ) -> OsalResult<ObjectAccess<'_>> {
        if name.is_empty() {
            return Err(OsalError::InvalidPointer);
        }
        self.get_by_search(mode, class, |_, rec| rec.name.as_str() == name)
    }

    /// Look up the first active slot (index order) satisfying `predicate`.
    pub fn get_by_search(
        &self,
        mode: LockMode,
        class: ObjectClass,
        mut predicate: impl FnMut(ObjectId, &ObjectRecord) -> bool,
    ) -> OsalResult<ObjectAccess<'_>> {
        let table = self.table(class);
        let guard = table.lock();
        let token = guard
            .iter()
            .enumerate()
            .find(|(_, rec)| rec.is_active() && predicate(rec.active_id, rec))
            .map(|(index, rec)| ObjectToken {
                class,
                id: rec.active_id,
                index,
            })
            .ok_or(OsalError::NameNotFound)?;
        self.escalate(table, guard, token, mode)
    }

    /// Apply the lock-mode contract to an already-validated slot.
    fn escalate<'a>(
        &'a self,
        table: &'a ClassTable,
        mut guard: MutexGuard<'a, Vec<ObjectRecord>>,
        token: ObjectToken,
        mode: LockMode,
    ) -> OsalResult<ObjectAccess<'a>> {
        match mode {
            LockMode::None => Ok(ObjectAccess::Unlocked(token)),
            LockMode::RefCount => {
                guard[token.index].refcount += 1;
                Ok(ObjectAccess::Unlocked(token))
            }
            LockMode::Global => Ok(ObjectAccess::Locked(LockedObject {
                guard,
                token,
                exclusive: false,
            })),
            LockMode::Exclusive => {
                while guard[token.index].refcount > 0 {
                    guard[token.index].flags.insert(RecordFlags::EXCL_REQ);
                    table.wait_drained(&mut guard);
                    // The object can vanish while we were parked; the wake
                    // is only a hint.
                    if guard[token.index].active_id != token.id {
                        return Err(OsalError::InvalidId);
                    }
                }
                Ok(ObjectAccess::Locked(LockedObject {
                    guard,
                    token,
                    exclusive: true,
                }))
            }
        }
    }

    /// `LockMode::None` lookup returning the bare token.
    pub fn check_id(&self, class: ObjectClass, id: ObjectId) -> OsalResult<ObjectToken> {
        Ok(self.get_by_id(LockMode::None, class, id)?.expect_unlocked())
    }

    /// `LockMode::Global` lookup returning the locked accessor.
    pub fn get_global(&self, class: ObjectClass, id: ObjectId) -> OsalResult<LockedObject<'_>> {
        self.get_by_id(LockMode::Global, class, id)?.expect_locked()
    }

    /// `LockMode::Exclusive` lookup returning the locked accessor.
    pub fn get_exclusive(&self, class: ObjectClass, id: ObjectId) -> OsalResult<LockedObject<'_>> {
        self.get_by_id(LockMode::Exclusive, class, id)?
            .expect_locked()
    }

    /// `LockMode::RefCount` lookup returning the counted token.
    pub fn get_refcount(&self, class: ObjectClass, id: ObjectId) -> OsalResult<ObjectToken> {
        Ok(self
            .get_by_id(LockMode::RefCount, class, id)?
            .expect_unlocked())
    }

    /// Release one shared reference taken in `RefCount` mode, waking any
    /// parked exclusive waiter when the count drains.
    pub fn refcount_decr(&self, token: &ObjectToken) {
        let table = self.table(token.class);
        let mut guard = table.lock();
        let rec = &mut guard[token.index];
        if rec.active_id != token.id {
            // The slot moved on without us; nothing left to release.
            tracing::debug!(id = %token.id, "refcount release on a replaced slot");
            return;
        }
        rec.refcount = rec.refcount.saturating_sub(1);
        if rec.refcount == 0 && rec.flags.contains(RecordFlags::EXCL_REQ) {
            table.notify_drained();
        }
    }

    /// Visit every active identifier matching the filters.
    ///
    /// Identifiers are snapshotted under brief per-class locks and the
    /// visitor runs with no lock held, so it may freely re-enter the
    /// manager (including deleting the object it was handed).
    pub fn for_each(
        &self,
        class_filter: Option<ObjectClass>,
        creator_filter: Option<ObjectId>,
        mut visitor: impl FnMut(ObjectId),
    ) {
        for class in ObjectClass::ALL {
            if class_filter.is_some_and(|c| c != class) {
                continue;
            }
            let ids: Vec<ObjectId> = {
                let guard = self.table(class).lock();
                guard
                    .iter()
                    .filter(|rec| {
                        rec.is_active() && creator_filter.map_or(true, |c| rec.creator == c)
                    })
                    .map(|rec| rec.active_id)
                    .collect()
            };
            for id in ids {
                visitor(id);
            }
        }
    }

    /// Copy of the record behind a live identifier.
    pub fn snapshot(&self, class: ObjectClass, id: ObjectId) -> OsalResult<ObjectRecord> {
        let index = id::array_index(class, id)?;
        let guard = self.table(class).lock();
        let rec = &guard[index];
        if rec.active_id != id {
            return Err(OsalError::InvalidId);
        }
        Ok(rec.clone())
    }

    /// Number of active objects in one class.
    pub fn active_count_in(&self, class: ObjectClass) -> usize {
        self.table(class)
            .lock()
            .iter()
            .filter(|r| r.is_active())
            .count()
    }

    /// Number of active objects across every class.
    pub fn active_count(&self) -> usize {
        ObjectClass::ALL
            .iter()
            .map(|&c| self.active_count_in(c))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const CLASS: ObjectClass = ObjectClass::Queue;

    fn make(tables: &ObjectTables, name: &str) -> ObjectId {
        let res = tables
            .allocate_new(CLASS, name, ObjectId::UNDEFINED)
            .unwrap();
        res.finalize(Ok(())).unwrap()
    }

    #[test]
    fn test_create_lookup_delete_roundtrip() {
        let tables = ObjectTables::new();
        let id = make(&tables, "Q1");
        assert_eq!(id.class(), Some(CLASS));

        let token = tables.check_id(CLASS, id).unwrap();
        assert_eq!(token.id, id);
        let rec = tables.snapshot(CLASS, id).unwrap();
        assert_eq!(rec.name.as_str(), "Q1");

        let locked = tables.get_exclusive(CLASS, id).unwrap();
        locked.finalize_delete(Ok(())).unwrap();
        assert_eq!(tables.check_id(CLASS, id), Err(OsalError::InvalidId));
    }

    #[test]
    fn test_duplicate_name_rejected_then_accepted_after_delete() {
        let tables = ObjectTables::new();
        let id_a = make(&tables, "Q1");
        assert!(matches!(
            tables.allocate_new(CLASS, "Q1", ObjectId::UNDEFINED),
            Err(OsalError::NameTaken)
        ));
        tables
            .get_exclusive(CLASS, id_a)
            .unwrap()
            .finalize_delete(Ok(()))
            .unwrap();
        let id_b = make(&tables, "Q1");
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn test_failed_finalize_frees_the_slot_and_name() {
        let tables = ObjectTables::new();
        let res = tables
            .allocate_new(CLASS, "Q1", ObjectId::UNDEFINED)
            .unwrap();
        assert_eq!(
            res.finalize(Err(OsalError::SemFailure)),
            Err(OsalError::SemFailure)
        );
        // Both the name and the slot are reusable.
        let id = make(&tables, "Q1");
        assert!(tables.check_id(CLASS, id).is_ok());
    }

    #[test]
    fn test_dropped_reservation_frees_the_slot() {
        let tables = ObjectTables::new();
        let res = tables
            .allocate_new(CLASS, "Q1", ObjectId::UNDEFINED)
            .unwrap();
        drop(res);
        assert_eq!(tables.active_count_in(CLASS), 0);
        let _ = make(&tables, "Q1");
    }

    #[test]
    fn test_capacity_exhaustion_and_recovery() {
        let tables = ObjectTables::new();
        let mut ids = Vec::new();
        for i in 0..CLASS.capacity() {
            ids.push(make(&tables, &format!("Q{i}")));
        }
        // All distinct.
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(matches!(
            tables.allocate_new(CLASS, "overflow", ObjectId::UNDEFINED),
            Err(OsalError::NoFreeIds)
        ));
        tables
            .get_exclusive(CLASS, ids[3])
            .unwrap()
            .finalize_delete(Ok(()))
            .unwrap();
        let replacement = make(&tables, "replacement");
        assert!(!ids.contains(&replacement));
    }

    #[test]
    fn test_generation_advance_on_slot_reuse() {
        let tables = ObjectTables::new();
        let mut seen = Vec::new();
        for round in 0..5 {
            let id = make(&tables, &format!("gen{round}"));
            assert!(!seen.contains(&id), "slot reuse must mint a fresh id");
            seen.push(id);
            tables
                .get_exclusive(CLASS, id)
                .unwrap()
                .finalize_delete(Ok(()))
                .unwrap();
        }
        // Same slot each time: capacity untouched elsewhere.
        for id in &seen {
            assert_eq!(id.serial() as usize % CLASS.capacity(), 0);
        }
    }

    #[test]
    fn test_name_and_search_lookup() {
        let tables = ObjectTables::new();
        let id = make(&tables, "alpha");
        let _ = make(&tables, "beta");

        let found = tables.get_by_name(LockMode::None, CLASS, "alpha").unwrap();
        assert_eq!(found.token().id, id);
        assert!(matches!(
            tables.get_by_name(LockMode::None, CLASS, "gamma"),
            Err(OsalError::NameNotFound)
        ));
        assert!(matches!(
            tables.get_by_name(LockMode::None, CLASS, ""),
            Err(OsalError::InvalidPointer)
        ));

        let hit = tables
            .get_by_search(LockMode::None, CLASS, |_, rec| {
                rec.name.as_str().starts_with('b')
            })
            .unwrap();
        assert_eq!(
            tables.snapshot(CLASS, hit.token().id).unwrap().name.as_str(),
            "beta"
        );
    }

    #[test]
    fn test_wrong_class_and_stale_ids_rejected() {
        let tables = ObjectTables::new();
        let id = make(&tables, "Q1");
        assert_eq!(
            tables.check_id(ObjectClass::BinSem, id),
            Err(OsalError::InvalidId)
        );
        tables
            .get_exclusive(CLASS, id)
            .unwrap()
            .finalize_delete(Ok(()))
            .unwrap();
        let reincarnation = make(&tables, "Q1");
        // Old handle targets the same slot but the generation moved on.
        assert_eq!(tables.check_id(CLASS, id), Err(OsalError::InvalidId));
        assert!(tables.check_id(CLASS, reincarnation).is_ok());
    }

    #[test]
    fn test_name_too_long_and_empty() {
        let tables = ObjectTables::new();
        let long = "x".repeat(crate::config::MAX_NAME_LEN + 1);
        assert!(matches!(
            tables.allocate_new(CLASS, &long, ObjectId::UNDEFINED),
            Err(OsalError::NameTooLong)
        ));
        assert!(matches!(
            tables.allocate_new(CLASS, "", ObjectId::UNDEFINED),
            Err(OsalError::InvalidPointer)
        ));
    }

    #[test]
    fn test_refcount_blocks_exclusive_until_drained() {
        let tables = Arc::new(ObjectTables::new());
        let id = make(&tables, "shared");

        let t1 = tables.get_refcount(CLASS, id).unwrap();
        let t2 = tables.get_refcount(CLASS, id).unwrap();
        assert_eq!(tables.snapshot(CLASS, id).unwrap().refcount, 2);

        let deleter = {
            let tables = Arc::clone(&tables);
            thread::spawn(move || {
                tables
                    .get_exclusive(CLASS, id)
                    .unwrap()
                    .finalize_delete(Ok(()))
                    .unwrap();
            })
        };

        // Give the deleter time to park on the condvar.
        thread::sleep(Duration::from_millis(50));
        assert!(!deleter.is_finished());
        assert!(tables
            .snapshot(CLASS, id)
            .unwrap()
            .flags
            .contains(RecordFlags::EXCL_REQ));

        tables.refcount_decr(&t1);
        thread::sleep(Duration::from_millis(50));
        assert!(!deleter.is_finished(), "one reference is still out");

        tables.refcount_decr(&t2);
        deleter.join().unwrap();
        assert_eq!(tables.check_id(CLASS, id), Err(OsalError::InvalidId));
    }

    #[test]
    fn test_concurrent_same_name_allocations_one_winner() {
        let tables = Arc::new(ObjectTables::new());
        let mut handles = Vec::new();
        for _ in 0..2 {
            let tables = Arc::clone(&tables);
            handles.push(thread::spawn(move || {
                match tables.allocate_new(CLASS, "X", ObjectId::UNDEFINED) {
                    Ok(res) => res.finalize(Ok(())).map(|_| ()),
                    Err(e) => Err(e),
                }
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let taken = results
            .iter()
            .filter(|r| matches!(r, Err(OsalError::NameTaken)))
            .count();
        assert_eq!((wins, taken), (1, 1));
    }

    #[test]
    fn test_for_each_filters_and_tolerates_reentry() {
        let tables = ObjectTables::new();
        let creator = ObjectId::compose(ObjectClass::Task, 1);
        let res = tables.allocate_new(CLASS, "mine", creator).unwrap();
        let mine = res.finalize(Ok(())).unwrap();
        let other = make(&tables, "other");

        let mut seen = Vec::new();
        tables.for_each(Some(CLASS), Some(creator), |id| seen.push(id));
        assert_eq!(seen, vec![mine]);

        // The visitor may re-enter the manager and delete what it is handed.
        tables.for_each(Some(CLASS), None, |id| {
            tables
                .get_exclusive(CLASS, id)
                .unwrap()
                .finalize_delete(Ok(()))
                .unwrap();
        });
        assert_eq!(tables.active_count_in(CLASS), 0);
        assert_eq!(tables.check_id(CLASS, other), Err(OsalError::InvalidId));
    }

    #[test]
    fn test_global_mode_holds_the_class_lock() {
        let tables = Arc::new(ObjectTables::new());
        let id = make(&tables, "held");
        let locked = tables.get_global(CLASS, id).unwrap();

        let blocked = {
            let tables = Arc::clone(&tables);
            thread::spawn(move || {
                let _ = tables.check_id(CLASS, id).unwrap();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished(), "class lock should exclude lookups");
        drop(locked);
        blocked.join().unwrap();
    }
}
