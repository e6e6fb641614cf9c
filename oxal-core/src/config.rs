// oxal-core: Compile-time capacities and clock configuration
// Capacities are fixed per class; tables never grow at runtime.

use crate::status::{OsalError, OsalResult};

/// Maximum length of an object name, excluding any terminator.
pub const MAX_NAME_LEN: usize = 20;

pub const MAX_TASKS: usize = 64;
pub const MAX_QUEUES: usize = 64;
pub const MAX_BINSEMS: usize = 32;
pub const MAX_COUNTSEMS: usize = 32;
pub const MAX_MUTEXES: usize = 32;
pub const MAX_STREAMS: usize = 32;
pub const MAX_DIRS: usize = 8;
pub const MAX_TIMEBASES: usize = 8;
pub const MAX_TIMECBS: usize = 32;
pub const MAX_MODULES: usize = 16;
pub const MAX_FILESYS: usize = 8;
pub const MAX_CONSOLES: usize = 4;

/// Microseconds represented by one abstract tick.
pub const MICROSECS_PER_TICK: u32 = 1000;

/// Abstract ticks per second.
pub const TICKS_PER_SECOND: u32 = 1000;

/// Upper bound (exclusive) on tick-count arguments to the timebase and
/// timer configuration calls.
pub const TICK_ARG_LIMIT: u32 = 1_000_000_000;

// A misconfigured capacity is a build failure, not a runtime surprise.
const _: () = assert!(MAX_NAME_LEN > 0);
const _: () = assert!(MAX_TASKS > 0);
const _: () = assert!(MAX_QUEUES > 0);
const _: () = assert!(MAX_BINSEMS > 0);
const _: () = assert!(MAX_COUNTSEMS > 0);
const _: () = assert!(MAX_MUTEXES > 0);
const _: () = assert!(MAX_STREAMS > 0);
const _: () = assert!(MAX_DIRS > 0);
const _: () = assert!(MAX_TIMEBASES > 0);
const _: () = assert!(MAX_TIMECBS > 0);
const _: () = assert!(MAX_MODULES > 0);
const _: () = assert!(MAX_FILESYS > 0);
const _: () = assert!(MAX_CONSOLES > 0);
const _: () = assert!(MICROSECS_PER_TICK > 0);
const _: () = assert!(TICKS_PER_SECOND > 0);

/// True when a tick geometry divides one second exactly.
pub fn clock_product_is_exact(microsecs_per_tick: u32, ticks_per_second: u32) -> bool {
    microsecs_per_tick as u64 * ticks_per_second as u64 == 1_000_000
}

/// Validate the configured tick geometry.
///
/// A product that drifts from one million microseconds makes every
/// tick/time conversion inexact, so the configuration is rejected outright
/// rather than silently rounding.
pub fn validate_clock_config() -> OsalResult<()> {
    if !clock_product_is_exact(MICROSECS_PER_TICK, TICKS_PER_SECOND) {
        tracing::warn!(
            microsecs_per_tick = MICROSECS_PER_TICK,
            ticks_per_second = TICKS_PER_SECOND,
            "tick configuration does not divide one second exactly"
        );
        return Err(OsalError::Error);
    }
    Ok(())
}
