use std::time::{Duration, Instant};

/// Slack added to each connect wait so a wake-up lands after the deadline
/// rather than just before it.
pub const DEADLINE_FUDGE: Duration = Duration::from_millis(5);

/// Source of the current time for deadline accounting.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant { Instant::now() }
}

/// Connect-phase deadline of one attempt.
///
/// Started when `open` begins and optionally restarted on each followed
/// redirect. A timeout too large to add to the clock leaves the deadline
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectDeadline {
    timeout:    Duration,
    expires_at: Option<Instant>,
}

impl ConnectDeadline {
    pub fn start(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            expires_at: now.checked_add(timeout),
        }
    }

    /// Restarts the full timeout from `now`.
    pub fn reset(&mut self, now: Instant) { self.expires_at = now.checked_add(self.timeout); }

    /// The instant the deadline passes, or `None` when unbounded.
    pub fn expires_at(&self) -> Option<Instant> { self.expires_at }

    /// Time left before the deadline, or `None` once it has passed.
    /// An unbounded deadline always has `Duration::MAX` left.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.expires_at {
            None => Some(Duration::MAX),
            Some(expires_at) if now >= expires_at => None,
            Some(expires_at) => Some(expires_at - now),
        }
    }
}
