// oxal-host: Hosted (std) kernel binding for the OXAL abstraction layer
// Tasks are std threads with registered identities, the internal tick
// source is a deadline-driven sleeper, and the semaphore/mutex/queue
// primitives are condvar-based implementations of the platform contracts
// the core consumes.

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! # OXAL Host Binding
//!
//! The reference host-kernel binding: everything the core treats as a
//! platform collaborator, implemented on std. The [`Osal`] facade is the
//! application-facing surface; it owns the core tables, the timebase
//! platform, and the per-class primitive state.
//!
//! ## Example
//!
//! ```rust
//! use oxal_host::Osal;
//! use oxal_core::Timeout;
//!
//! let osal = Osal::new().unwrap();
//! let queue = osal.queue_create("events", 8, 64).unwrap();
//! osal.queue_put(queue, b"boot").unwrap();
//! assert_eq!(osal.queue_get(queue, Timeout::Poll).unwrap(), b"boot");
//! osal.delete_all_objects().unwrap();
//! ```

mod binsem;
mod countsem;
mod identity;
mod mutexsem;
mod osal;
mod platform;
mod queue;
mod slots;
mod ticker;
mod wait;

pub use identity::current_task_id;
pub use osal::{Osal, TaskInfo};
pub use platform::HostPlatform;
pub use queue::MAX_QUEUE_DEPTH;

// The vocabulary types callers need alongside the facade.
pub use oxal_core::{
    ObjectClass, ObjectId, OsalError, OsalResult, SyncSource, TimeBaseStatus, Timeout,
    TimerCallback, TimerStatus,
};
