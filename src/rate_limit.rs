use crate::error::JobsmithError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Admission limit for one worker pool: at most `max_jobs` executions may
/// start within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_jobs: u32,
    pub window_ms: u64,
}

impl RateLimit {
    pub fn new(max_jobs: u32, window: Duration) -> Self {
        Self {
            max_jobs,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Create a rate limit of X starts per second
    pub fn per_second(max_jobs: u32) -> Self {
        Self::new(max_jobs, Duration::from_secs(1))
    }

    /// Create a rate limit of X starts per minute
    pub fn per_minute(max_jobs: u32) -> Self {
        Self::new(max_jobs, Duration::from_secs(60))
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Start times of the grants still inside the window, oldest first.
#[derive(Debug)]
pub struct SlidingWindow {
    grants: VecDeque<Instant>,
    max_jobs: usize,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(max_jobs: u32, window: Duration) -> Self {
        Self {
            grants: VecDeque::with_capacity(max_jobs as usize),
            max_jobs: max_jobs as usize,
            window,
        }
    }

    /// Drop grants that have left the window
    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.grants.front() {
            if now.duration_since(*oldest) >= self.window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a grant at `now` if the window has room.
    pub fn try_grant(&mut self, now: Instant) -> bool {
        self.expire(now);

        if self.grants.len() < self.max_jobs {
            self.grants.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest grant leaves the window.
    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        self.expire(now);

        if self.grants.len() < self.max_jobs {
            return Duration::ZERO;
        }

        match self.grants.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            // max_jobs == 0 never admits anything; poll at window granularity
            None => self.window.max(Duration::from_millis(1)),
        }
    }

    pub fn in_window(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.grants.len()
    }

    /// Take back the most recent grant.
    pub fn revoke_latest(&mut self) -> bool {
        self.grants.pop_back().is_some()
    }
}

/// Rate limiter shared by the worker slots of one pool.
///
/// Uses tokio's clock, so it honours `tokio::time::pause()` in tests.
#[derive(Debug)]
pub struct RateLimiter {
    window: Arc<Mutex<SlidingWindow>>,
    rate_limit: RateLimit,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(rate_limit: RateLimit) -> Self {
        Self {
            window: Arc::new(Mutex::new(SlidingWindow::new(
                rate_limit.max_jobs,
                rate_limit.window(),
            ))),
            rate_limit,
        }
    }

    /// Try to acquire a permit, returning immediately
    pub fn try_acquire(&self) -> bool {
        match self.window.lock() {
            Ok(mut window) => window.try_grant(Instant::now()),
            Err(_) => false,
        }
    }

    /// Wait until a start is allowed
    pub async fn acquire(&self) -> Result<(), JobsmithError> {
        loop {
            let wait_time = {
                let mut window = self.window.lock().map_err(|_| JobsmithError::Worker {
                    message: "Rate limiter lock poisoned".to_string(),
                })?;
                let now = Instant::now();
                if window.try_grant(now) {
                    return Ok(());
                }
                window.time_until_available(now)
            };

            sleep(wait_time.max(Duration::from_millis(1))).await;
        }
    }

    /// Return a permit that was acquired but not used to start a job.
    pub fn refund(&self) {
        if let Ok(mut window) = self.window.lock() {
            window.revoke_latest();
        }
    }

    /// Get the current rate limit configuration
    pub fn rate_limit(&self) -> &RateLimit {
        &self.rate_limit
    }

    /// Starts still counted against the window (for monitoring)
    pub fn in_window(&self) -> usize {
        self.window
            .lock()
            .map(|mut window| window.in_window(Instant::now()))
            .unwrap_or(0)
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            window: Arc::clone(&self.window),
            rate_limit: self.rate_limit,
        }
    }
}
