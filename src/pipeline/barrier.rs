//! Transaction-flush barrier.
//!
//! Query threads call [`FlushBarrier::request_and_wait`]; the dispatch thread
//! calls [`FlushBarrier::serve`] once per tick. A request is satisfied only by
//! a flush that started after the request was made, and flushes only ever run
//! on the thread calling `serve`.

use crate::error::{KernelError, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct FlushState {
    /// Tickets handed out.
    requested: u64,
    /// Highest ticket covered by a finished flush.
    completed: u64,
}

#[derive(Debug, Default)]
pub struct FlushBarrier {
    state: Mutex<FlushState>,
    done: Condvar,
}

impl FlushBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a flush and block until one that started afterwards finishes.
    pub fn request_and_wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.requested += 1;
        let ticket = state.requested;
        while state.completed < ticket {
            if self.done.wait_until(&mut state, deadline).timed_out() && state.completed < ticket {
                return Err(KernelError::Timeout(format!(
                    "flush not served within {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }

    /// Whether any request is waiting.
    pub fn is_pending(&self) -> bool {
        let state = self.state.lock();
        state.requested > state.completed
    }

    /// Run `flush` if a request is pending, then wake the waiters it covers.
    ///
    /// Returns true if a flush ran.
    pub fn serve(&self, flush: impl FnOnce()) -> bool {
        let target = {
            let state = self.state.lock();
            if state.requested == state.completed {
                return false;
            }
            state.requested
        };

        flush();

        let mut state = self.state.lock();
        state.completed = state.completed.max(target);
        drop(state);
        self.done.notify_all();
        true
    }
}
