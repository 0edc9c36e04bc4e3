//! Retry and backoff policy for failed jobs.
//!
//! When a handler fails, the worker pool asks [`decide`] what to do next. The
//! decision depends only on the attempt counter, the attempt ceiling and the
//! job's [`BackoffPolicy`], so it can be tested without a store or a clock.
//!
//! # Backoff kinds
//!
//! - [`Fixed`](BackoffKind::Fixed) - every retry waits `base_delay_ms`
//! - [`Exponential`](BackoffKind::Exponential) - retry *k* waits `base_delay_ms * 2^(k-1)`
//!
//! # Examples
//!
//! ```rust
//! use jobsmith::retry::{decide, BackoffPolicy, RetryDecision};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::exponential(1000);
//!
//! // First failure of a job allowed three attempts
//! assert_eq!(
//!     decide(0, 3, &policy),
//!     RetryDecision::Retry { attempts_made: 1, delay: Duration::from_millis(1000) }
//! );
//!
//! // Third failure exhausts the attempts
//! assert_eq!(decide(2, 3, &policy), RetryDecision::Fail { attempts_made: 3 });
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Constant delay between all retry attempts.
    Fixed,
    /// Doubling delay: `base * 2^(retry - 1)`.
    Exponential,
}

impl std::fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffKind::Fixed => write!(f, "fixed"),
            BackoffKind::Exponential => write!(f, "exponential"),
        }
    }
}

/// Backoff configuration carried by every job.
///
/// # Examples
///
/// ```rust
/// use jobsmith::retry::BackoffPolicy;
/// use std::time::Duration;
///
/// let fixed = BackoffPolicy::fixed(5000);
/// assert_eq!(fixed.delay_for(1), Duration::from_secs(5));
/// assert_eq!(fixed.delay_for(4), Duration::from_secs(5));
///
/// let exponential = BackoffPolicy::exponential(1000);
/// assert_eq!(exponential.delay_for(1), Duration::from_secs(1));
/// assert_eq!(exponential.delay_for(2), Duration::from_secs(2));
/// assert_eq!(exponential.delay_for(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
        }
    }

    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Exponential growth saturates at `u64::MAX` milliseconds instead of
    /// overflowing.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let factor = 2u64
                    .checked_pow(retry.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(millis)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1000)
    }
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job as `delayed`, to run again after `delay`.
    Retry { attempts_made: u32, delay: Duration },
    /// No attempts remain; the job becomes terminal `failed`.
    Fail { attempts_made: u32 },
}

impl RetryDecision {
    pub fn attempts_made(&self) -> u32 {
        match self {
            RetryDecision::Retry { attempts_made, .. } => *attempts_made,
            RetryDecision::Fail { attempts_made } => *attempts_made,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryDecision::Fail { .. })
    }
}

/// Decide what happens to a job whose attempt just failed.
///
/// `attempts_made` is the count before the failed attempt; the returned
/// decision carries the incremented count. The counter never exceeds
/// `max_attempts`.
pub fn decide(attempts_made: u32, max_attempts: u32, policy: &BackoffPolicy) -> RetryDecision {
    let attempts_made = attempts_made.saturating_add(1).min(max_attempts.max(1));

    if attempts_made >= max_attempts {
        RetryDecision::Fail { attempts_made }
    } else {
        RetryDecision::Retry {
            attempts_made,
            delay: policy.delay_for(attempts_made),
        }
    }
}
