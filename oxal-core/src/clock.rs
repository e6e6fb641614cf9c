// oxal-core: Tick/time conversion
// All intermediate math is 64-bit; a conversion either fits or is rejected.

use crate::config::TICKS_PER_SECOND;
use crate::status::{OsalError, OsalResult};

/// How long a blocking call is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return immediately if the condition is not already met.
    Poll,
    /// Wait up to the given number of milliseconds.
    Millis(u32),
    /// Wait until the condition is met.
    Forever,
}

/// Convert a millisecond interval into abstract ticks, rounding up so a
/// nonzero delay never degrades to a zero-tick (busy) wait.
pub fn milli_to_ticks(milliseconds: u32) -> OsalResult<u32> {
    let numerator = milliseconds as u64 * TICKS_PER_SECOND as u64;
    let ticks = numerator.div_ceil(1000);
    u32::try_from(ticks).map_err(|_| OsalError::TimerInvalidArgs)
}
