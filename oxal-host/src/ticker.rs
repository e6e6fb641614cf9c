// oxal-host: Internal interval tick source
// The hosted stand-in for a kernel timer: a deadline-driven sleeper that
// reports how many abstract ticks each expiry represents. Reconfiguration
// and shutdown interrupt the sleep through the condvar.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use oxal_core::config::MICROSECS_PER_TICK;
use oxal_core::SyncSource;

fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_micros(ticks as u64 * MICROSECS_PER_TICK as u64)
}

struct TickerState {
    start_ticks: u32,
    interval_ticks: u32,
    /// Bumped on every reconfiguration so the sleeper restarts its phase.
    epoch: u64,
    shutdown: bool,
}

struct TickerShared {
    state: Mutex<TickerState>,
    changed: Condvar,
}

/// Control handle retained by the platform; reconfigures or stops the
/// paired [`IntervalTicker`].
pub(crate) struct TickerHandle {
    shared: Arc<TickerShared>,
}

impl TickerHandle {
    pub(crate) fn configure(&self, start_ticks: u32, interval_ticks: u32) {
        let mut state = self.shared.state.lock();
        state.start_ticks = start_ticks;
        state.interval_ticks = interval_ticks;
        state.epoch += 1;
        self.shared.changed.notify_all();
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        self.shared.changed.notify_all();
    }
}

/// The helper-thread side: blocks until the next deadline and reports the
/// ticks it represents. Unconfigured and dormant tickers park on the
/// condvar; shutdown surfaces as a zero-tick return, after which the
/// helper's deletion check takes over.
pub(crate) struct IntervalTicker {
    shared: Arc<TickerShared>,
    epoch_seen: u64,
    deadline: Option<Instant>,
    pending_ticks: u32,
}

impl IntervalTicker {
    pub(crate) fn new_pair() -> (IntervalTicker, TickerHandle) {
        let shared = Arc::new(TickerShared {
            state: Mutex::new(TickerState {
                start_ticks: 0,
                interval_ticks: 0,
                epoch: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
        });
        (
            IntervalTicker {
                shared: Arc::clone(&shared),
                epoch_seen: 0,
                deadline: None,
                pending_ticks: 0,
            },
            TickerHandle { shared },
        )
    }
}

impl SyncSource for IntervalTicker {
    fn wait_for_tick(&mut self) -> u32 {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return 0;
            }
            if state.epoch != self.epoch_seen {
                // (Re)configured: restart the phase from now.
                self.epoch_seen = state.epoch;
                let first = if state.start_ticks > 0 {
                    state.start_ticks
                } else {
                    state.interval_ticks
                };
                if first > 0 {
                    self.pending_ticks = first;
                    self.deadline = Some(Instant::now() + ticks_to_duration(first));
                } else {
                    self.pending_ticks = 0;
                    self.deadline = None;
                }
            }
            match self.deadline {
                None => {
                    // Unconfigured or dormant; nothing to count until a
                    // reconfiguration arrives.
                    self.shared.changed.wait(&mut state);
                }
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        let reported = self.pending_ticks;
                        if state.interval_ticks > 0 {
                            self.pending_ticks = state.interval_ticks;
                            self.deadline =
                                Some(deadline + ticks_to_duration(state.interval_ticks));
                        } else {
                            // One expiry configured; dormant afterwards.
                            self.deadline = None;
                        }
                        return reported;
                    }
                    let _ = self.shared.changed.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_reports_configured_ticks() {
        let (mut ticker, handle) = IntervalTicker::new_pair();
        // 2-tick start, 3-tick interval; with 1000 us/tick these are short
        // real delays.
        handle.configure(2, 3);
        let began = Instant::now();
        assert_eq!(ticker.wait_for_tick(), 2);
        assert_eq!(ticker.wait_for_tick(), 3);
        assert!(began.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_shutdown_interrupts_the_wait() {
        let (mut ticker, handle) = IntervalTicker::new_pair();
        handle.configure(0, 1_000_000); // ~17 minutes; must not matter
        let waiter = std::thread::spawn(move || ticker.wait_for_tick());
        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn test_reconfigure_restarts_the_phase() {
        let (mut ticker, handle) = IntervalTicker::new_pair();
        handle.configure(0, 1_000_000);
        let waiter = std::thread::spawn(move || ticker.wait_for_tick());
        std::thread::sleep(Duration::from_millis(20));
        // Shrink the period; the parked sleeper must pick it up.
        handle.configure(1, 1);
        let ticks = waiter.join().unwrap();
        assert_eq!(ticks, 1);
    }
}
