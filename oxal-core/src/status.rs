// oxal-core: Boundary status codes
// Every failure surfaces as a status return; the core never aborts the process.

use thiserror::Error;

/// Result alias used across the abstraction layer.
pub type OsalResult<T> = Result<T, OsalError>;

/// Raw status value reported for a successful call at the C-style boundary.
pub const STATUS_OK: i32 = 0;

/// Every status the core and the host bindings can surface.
///
/// Each variant maps to a stable signed integer via [`OsalError::code`], so
/// bindings that speak raw status words (FSW ground tooling, C callers) see
/// the same numbering across releases.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsalError {
    /// Catch-all failure with no more specific classification.
    #[error("unspecified error")]
    Error,

    /// A required argument was null/empty at the boundary.
    #[error("null or empty required argument")]
    InvalidPointer,

    /// Name exceeds the configured maximum length.
    #[error("name exceeds the configured maximum length")]
    NameTooLong,

    /// No active object in the class carries the requested name.
    #[error("no object with that name exists in the class")]
    NameNotFound,

    /// An active object in the class already carries the requested name.
    #[error("an active object in the class already has that name")]
    NameTaken,

    /// The identifier is stale, malformed, or belongs to another class.
    #[error("identifier is stale, malformed, or of the wrong class")]
    InvalidId,

    /// Every slot in the class is in use.
    #[error("all slots in the class are in use")]
    NoFreeIds,

    /// The object exists but is not in a state that permits the operation.
    #[error("object is not in a state that permits the operation")]
    IncorrectObjState,

    /// A timed semaphore wait expired before the semaphore was given.
    #[error("semaphore wait timed out")]
    SemTimeout,

    /// The underlying semaphore operation failed.
    #[error("semaphore operation failed")]
    SemFailure,

    /// Non-blocking queue read found no message.
    #[error("queue is empty")]
    QueueEmpty,

    /// Queue write found no free message slot.
    #[error("queue is full")]
    QueueFull,

    /// A timed queue read expired before a message arrived.
    #[error("queue wait timed out")]
    QueueTimeout,

    /// Message size is incompatible with the queue's configured maximum.
    #[error("message size exceeds the queue's configured maximum")]
    QueueInvalidSize,

    /// A timer/timebase tick argument is out of the accepted range.
    #[error("timer argument out of range")]
    TimerInvalidArgs,

    /// Teardown swept five times and objects still remain; they are leaked
    /// rather than deadlocking the sweep.
    #[error("{remaining} objects remained after teardown")]
    ObjectsOutstanding { remaining: usize },
}

impl OsalError {
    /// Stable signed status code for this error.
    pub const fn code(&self) -> i32 {
        match self {
            OsalError::Error => -1,
            OsalError::InvalidPointer => -2,
            OsalError::NameTooLong => -3,
            OsalError::NameNotFound => -4,
            OsalError::NameTaken => -5,
            OsalError::InvalidId => -6,
            OsalError::NoFreeIds => -7,
            OsalError::IncorrectObjState => -8,
            OsalError::SemTimeout => -9,
            OsalError::SemFailure => -10,
            OsalError::QueueEmpty => -11,
            OsalError::QueueFull => -12,
            OsalError::QueueTimeout => -13,
            OsalError::QueueInvalidSize => -14,
            OsalError::TimerInvalidArgs => -15,
            // Diagnostic refinement of the generic failure code.
            OsalError::ObjectsOutstanding { .. } => -1,
        }
    }
}

/// Collapse a result into the raw status word used at the boundary.
pub fn status_code<T>(result: &OsalResult<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.code(),
    }
}
