// oxal-host: The hosted timebase platform
// Helper threads are std threads; the internal tick source is the
// deadline-driven interval ticker. Helpers register their timebase's
// identifier as their task identity before entering the core loop.

use parking_lot::Mutex;

use oxal_core::config::MAX_TIMEBASES;
use oxal_core::{run_helper, HelperSpawn, ObjectId, OsalError, OsalResult, SyncSource};
use oxal_core::TimeBasePlatform;

use crate::identity;
use crate::ticker::{IntervalTicker, TickerHandle};

/// Hosted implementation of the platform services the timebase core
/// consumes.
pub struct HostPlatform {
    tickers: Mutex<Vec<Option<TickerHandle>>>,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlatform {
    pub fn new() -> HostPlatform {
        HostPlatform {
            tickers: Mutex::new((0..MAX_TIMEBASES).map(|_| None).collect()),
        }
    }
}

impl TimeBasePlatform for HostPlatform {
    fn current_task_id(&self) -> ObjectId {
        identity::current_task_id()
    }

    fn spawn_helper(&self, spawn: HelperSpawn) -> OsalResult<()> {
        std::thread::Builder::new()
            .name("oxal-timebase".into())
            .spawn(move || {
                let HelperSpawn {
                    cell,
                    startup,
                    sync,
                } = spawn;
                // Parked until creation finalizes; a closed channel means
                // creation failed and there is nothing to service.
                let id = match startup.recv() {
                    Ok(id) => id,
                    Err(_) => return,
                };
                identity::register_current(id);
                run_helper(cell, id, sync);
                identity::clear_current();
            })
            .map(|_| ())
            .map_err(|_| OsalError::Error)
    }

    fn internal_source(&self, index: usize) -> OsalResult<Box<dyn SyncSource>> {
        let (ticker, handle) = IntervalTicker::new_pair();
        self.tickers.lock()[index] = Some(handle);
        Ok(Box::new(ticker))
    }

    fn internal_set(&self, index: usize, start_ticks: u32, interval_ticks: u32) -> OsalResult<()> {
        match &self.tickers.lock()[index] {
            Some(handle) => {
                handle.configure(start_ticks, interval_ticks);
                Ok(())
            }
            None => Err(OsalError::IncorrectObjState),
        }
    }

    fn internal_clear(&self, index: usize) {
        if let Some(handle) = self.tickers.lock()[index].take() {
            handle.shutdown();
        }
    }
}
