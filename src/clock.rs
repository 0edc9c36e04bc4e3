//! Time sources for the store and queues.
//!
//! Every timestamp a job carries comes from a [`Clock`]. Production code uses
//! [`SystemClock`]; tests either drive a [`MockClock`] by hand or use
//! [`TokioClock`], which follows tokio's (possibly paused) timer so that
//! worker pools and delayed jobs can be exercised without real waiting.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

/// Source of "now" for job timestamps and eligibility checks.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for controlling time in tests.
///
/// # Examples
///
/// ```rust
/// use jobsmith::clock::{Clock, MockClock};
/// use chrono::Duration;
///
/// let clock = MockClock::new();
/// let start = clock.now();
///
/// clock.advance(Duration::hours(1));
/// assert_eq!((clock.now() - start).num_hours(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current time.
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Advance the mock time by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *time += duration;
    }

    /// Set the mock time to a specific instant.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = time;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clock anchored to tokio's timer.
///
/// Reports the wall-clock time at construction plus the elapsed
/// `tokio::time::Instant` time, so `tokio::time::pause()` and
/// `tokio::time::advance()` move it too.
#[derive(Clone, Debug)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.anchor.checked_add_signed(elapsed))
            .unwrap_or(self.anchor)
    }
}
