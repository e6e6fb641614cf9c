// oxal-host: Timeout-to-deadline resolution shared by the blocking primitives

use std::time::{Duration, Instant};

use oxal_core::Timeout;

/// A [`Timeout`] resolved against the clock at call entry, so retries
/// inside a wait loop never extend the caller's deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WaitLimit {
    Poll,
    Forever,
    Until(Instant),
}

impl WaitLimit {
    pub(crate) fn resolve(timeout: Timeout) -> WaitLimit {
        match timeout {
            Timeout::Poll => WaitLimit::Poll,
            Timeout::Forever => WaitLimit::Forever,
            Timeout::Millis(ms) => {
                WaitLimit::Until(Instant::now() + Duration::from_millis(ms as u64))
            }
        }
    }
}
