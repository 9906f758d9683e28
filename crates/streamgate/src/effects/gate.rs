use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Resettable one-shot signal between engine callbacks and the caller thread.
///
/// The caller closes the gate, kicks off engine work and blocks; a callback
/// publishes its results and then opens the gate. Opening and blocking go
/// through the same mutex, so everything written before `open` is visible to
/// the thread that returns from `block`.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self { Self::default() }

    /// Opens the gate and wakes every waiter. Returns `true` if it was closed.
    pub fn open(&self) -> bool {
        let mut open = self.lock();
        let was_closed = !*open;
        *open = true;
        self.cond.notify_all();
        was_closed
    }

    /// Closes the gate. Returns `true` if it was open.
    pub fn close(&self) -> bool {
        let mut open = self.lock();
        let was_open = *open;
        *open = false;
        was_open
    }

    pub fn is_open(&self) -> bool { *self.lock() }

    /// Blocks until the gate is open or `timeout` has elapsed.
    ///
    /// Returns whether the gate is open. Spurious wake-ups are absorbed.
    pub fn block(&self, timeout: Duration) -> bool {
        let Some(until) = Instant::now().checked_add(timeout) else {
            return self.block_forever();
        };
        let mut open = self.lock();
        while !*open {
            let now = Instant::now();
            if now >= until {
                return false;
            }
            open = match self.cond.wait_timeout(open, until - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn block_forever(&self) -> bool {
        let mut open = self.lock();
        while !*open {
            open = self.cond.wait(open).unwrap_or_else(|e| e.into_inner());
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> { self.open.lock().unwrap_or_else(|e| e.into_inner()) }
}
