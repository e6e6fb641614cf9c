// oxal-host: Thread-local task identity
// Threads spawned through the facade register the identifier they were
// created under; timebase helpers register their timebase's identifier,
// which is what the helper-caller rejection in the core keys on.

use std::cell::Cell;

use oxal_core::ObjectId;

thread_local! {
    static CURRENT_TASK: Cell<ObjectId> = const { Cell::new(ObjectId::UNDEFINED) };
}

/// Identity of the calling thread, or [`ObjectId::UNDEFINED`] when the
/// thread was not created through the abstraction layer.
pub fn current_task_id() -> ObjectId {
    CURRENT_TASK.with(Cell::get)
}

pub(crate) fn register_current(id: ObjectId) {
    CURRENT_TASK.with(|cell| cell.set(id));
}

pub(crate) fn clear_current() {
    CURRENT_TASK.with(|cell| cell.set(ObjectId::UNDEFINED));
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxal_core::ObjectClass;

    #[test]
    fn test_unregistered_thread_has_no_identity() {
        assert_eq!(current_task_id(), ObjectId::UNDEFINED);
    }

    #[test]
    fn test_identity_is_thread_local() {
        let id = ObjectId::compose(ObjectClass::Task, 3);
        register_current(id);
        assert_eq!(current_task_id(), id);

        let other = std::thread::spawn(current_task_id).join().unwrap();
        assert_eq!(other, ObjectId::UNDEFINED);

        clear_current();
        assert_eq!(current_task_id(), ObjectId::UNDEFINED);
    }
}
