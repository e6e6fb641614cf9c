// oxal-host: Hosted message queue
// Bounded FIFO of byte messages. Put never blocks (a full queue is a
// status, not a wait); get supports poll, timed, and indefinite waits.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use oxal_core::{OsalError, OsalResult, Timeout};

use crate::wait::WaitLimit;

/// Deepest queue the hosted binding will create.
pub const MAX_QUEUE_DEPTH: usize = 64;

struct QueueState {
    messages: VecDeque<Vec<u8>>,
    deleted: bool,
}

pub(crate) struct HostQueue {
    depth: usize,
    max_msg_size: usize,
    state: Mutex<QueueState>,
    arrived: Condvar,
}

impl HostQueue {
    pub(crate) fn new(depth: usize, max_msg_size: usize) -> OsalResult<HostQueue> {
        if depth == 0 || depth > MAX_QUEUE_DEPTH || max_msg_size == 0 {
            return Err(OsalError::QueueInvalidSize);
        }
        Ok(HostQueue {
            depth,
            max_msg_size,
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(depth),
                deleted: false,
            }),
            arrived: Condvar::new(),
        })
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        drop(state);
        self.arrived.notify_all();
    }

    pub(crate) fn put(&self, message: &[u8]) -> OsalResult<()> {
        if message.len() > self.max_msg_size {
            return Err(OsalError::QueueInvalidSize);
        }
        let mut state = self.state.lock();
        if state.messages.len() >= self.depth {
            return Err(OsalError::QueueFull);
        }
        state.messages.push_back(message.to_vec());
        drop(state);
        self.arrived.notify_one();
        Ok(())
    }

    pub(crate) fn get(&self, timeout: Timeout) -> OsalResult<Vec<u8>> {
        let limit = WaitLimit::resolve(timeout);
        let mut state = self.state.lock();
        loop {
            if state.deleted {
                return Err(OsalError::Error);
            }
            if let Some(message) = state.messages.pop_front() {
                return Ok(message);
            }
            match limit {
                WaitLimit::Poll => return Err(OsalError::QueueEmpty),
                WaitLimit::Forever => {
                    self.arrived.wait(&mut state);
                }
                WaitLimit::Until(deadline) => {
                    if self.arrived.wait_until(&mut state, deadline).timed_out() {
                        if state.deleted {
                            return Err(OsalError::Error);
                        }
                        return match state.messages.pop_front() {
                            Some(message) => Ok(message),
                            None => Err(OsalError::QueueTimeout),
                        };
                    }
                }
            }
        }
    }
}
