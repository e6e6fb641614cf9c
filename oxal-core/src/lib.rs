// oxal-core: Object identifier tables and the timebase scheduling core
// Platform primitives are consumed through traits; per-kernel bindings live
// in the host crates layered on top of this one.

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # OXAL Core
//!
//! The portable heart of the OXAL abstraction layer: a process-wide,
//! partitioned table of resource records keyed by opaque 32-bit
//! identifiers, and the timebase machinery that drives periodic user
//! callbacks from per-timebase helper threads.
//!
//! ## Key Components
//!
//! - **Id / Class**: opaque identifier encoding with per-slot generation
//!   counters, making stale handles detectable by construction
//! - **ClassTable**: one locked, fixed-capacity record array per resource
//!   class
//! - **ObjectTables**: allocation, name/predicate lookup, refcounting, and
//!   the locked create/delete handoff every primitive follows
//! - **TimeBaseCore**: timebase records, the helper-thread service loop,
//!   and the per-timebase callback ring with bounded backlog
//!
//! ## Locking Model
//!
//! Class locks are `parking_lot` mutexes with a condvar per class for the
//! exclusive-delete wait. The per-timebase nested lock is a reentrant
//! mutex: dispatched callbacks run on the helper thread with that lock
//! held and may re-enter the timer API. Lock order is always class lock
//! before per-timebase lock.
//!
//! ## Example
//!
//! ```rust
//! use oxal_core::prelude::*;
//!
//! let tables = ObjectTables::new();
//! let reservation = tables
//!     .allocate_new(ObjectClass::Queue, "telemetry", ObjectId::UNDEFINED)
//!     .unwrap();
//! // ... platform create would run here, class lock held ...
//! let id = reservation.finalize(Ok(())).unwrap();
//!
//! assert!(tables.check_id(ObjectClass::Queue, id).is_ok());
//! tables
//!     .get_exclusive(ObjectClass::Queue, id)
//!     .unwrap()
//!     .finalize_delete(Ok(()))
//!     .unwrap();
//! assert!(tables.check_id(ObjectClass::Queue, id).is_err());
//! ```

pub mod clock;
pub mod config;
pub mod id;
pub mod manager;
pub mod record;
pub mod status;
pub mod table;
pub mod timebase;
pub mod timer;

pub use clock::{milli_to_ticks, Timeout};
pub use id::{ObjectClass, ObjectId, CLASS_COUNT};
pub use manager::{LockMode, LockedObject, ObjectAccess, ObjectTables, ObjectToken, Reservation};
pub use record::{ObjectName, ObjectRecord, RecordFlags};
pub use status::{status_code, OsalError, OsalResult, STATUS_OK};
pub use table::ClassTable;
pub use timebase::{
    run_helper, HelperSpawn, SyncSource, TimeBaseCell, TimeBaseCore, TimeBasePlatform,
    TimeBaseStatus,
};
pub use timer::{TimerCallback, TimerStatus};

/// Convenience re-exports for consumers of the core API.
pub mod prelude {
    pub use crate::clock::Timeout;
    pub use crate::id::{ObjectClass, ObjectId};
    pub use crate::manager::{LockMode, ObjectTables};
    pub use crate::status::{OsalError, OsalResult};
    pub use crate::timebase::{SyncSource, TimeBaseCore};
    pub use crate::timer::TimerCallback;
}
