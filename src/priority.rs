//! Job priority tiers.
//!
//! Jobs carry one of three priority tiers. Lower numeric values run first, and
//! jobs within the same tier run in enqueue order.
//!
//! - **High (1)**: account-critical messages such as welcome and password-reset emails
//! - **Medium (2)**: regular notifications (default)
//! - **Low (3)**: bulk or deferrable processing

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job priority tiers that determine dequeue order.
///
/// The derived ordering follows the numeric value, so sorting ascending puts the
/// most urgent job first.
///
/// # Examples
///
/// ```rust
/// use jobsmith::JobPriority;
/// use std::str::FromStr;
///
/// let priority = JobPriority::from_str("high").unwrap();
/// assert_eq!(priority, JobPriority::High);
/// assert_eq!(priority.as_i32(), 1);
///
/// // Lower value sorts first
/// assert!(JobPriority::High < JobPriority::Medium);
/// assert!(JobPriority::Medium < JobPriority::Low);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(try_from = "i32", into = "i32")]
pub enum JobPriority {
    /// Dequeued before everything else.
    High = 1,

    /// Default tier.
    #[default]
    Medium = 2,

    /// Dequeued when nothing more urgent is waiting.
    Low = 3,
}

impl JobPriority {
    /// Gets the numeric value of the tier.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Creates a tier from its numeric value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use jobsmith::JobPriority;
    ///
    /// assert_eq!(JobPriority::from_i32(1).unwrap(), JobPriority::High);
    /// assert_eq!(JobPriority::from_i32(3).unwrap(), JobPriority::Low);
    /// assert!(JobPriority::from_i32(0).is_err());
    /// assert!(JobPriority::from_i32(4).is_err());
    /// ```
    pub fn from_i32(value: i32) -> Result<Self, PriorityError> {
        match value {
            1 => Ok(JobPriority::High),
            2 => Ok(JobPriority::Medium),
            3 => Ok(JobPriority::Low),
            _ => Err(PriorityError::InvalidPriorityValue(value)),
        }
    }

    /// All tiers, most urgent first.
    pub fn all_priorities() -> Vec<JobPriority> {
        vec![JobPriority::High, JobPriority::Medium, JobPriority::Low]
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Medium => write!(f, "medium"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = PriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" | "h" | "1" => Ok(JobPriority::High),
            "medium" | "m" | "normal" | "2" => Ok(JobPriority::Medium),
            "low" | "l" | "3" => Ok(JobPriority::Low),
            _ => Err(PriorityError::InvalidPriorityString(s.to_string())),
        }
    }
}

impl TryFrom<i32> for JobPriority {
    type Error = PriorityError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        JobPriority::from_i32(value)
    }
}

impl From<JobPriority> for i32 {
    fn from(priority: JobPriority) -> Self {
        priority.as_i32()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriorityError {
    #[error("Invalid priority value: {0}, expected 1 (high), 2 (medium) or 3 (low)")]
    InvalidPriorityValue(i32),

    #[error("Invalid priority string: {0}")]
    InvalidPriorityString(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![JobPriority::Low, JobPriority::High, JobPriority::Medium];
        priorities.sort();
        assert_eq!(priorities, JobPriority::all_priorities());
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(JobPriority::from_str("HIGH").unwrap(), JobPriority::High);
        assert_eq!(JobPriority::from_str("medium").unwrap(), JobPriority::Medium);
        assert_eq!(JobPriority::from_str("l").unwrap(), JobPriority::Low);
        assert_eq!(
            JobPriority::from_str("urgent"),
            Err(PriorityError::InvalidPriorityString("urgent".to_string()))
        );
    }

    #[test]
    fn test_priority_serde_uses_numeric_tier() {
        let json = serde_json::to_string(&JobPriority::High).unwrap();
        assert_eq!(json, "1");

        let parsed: JobPriority = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, JobPriority::Low);

        assert!(serde_json::from_str::<JobPriority>("7").is_err());
    }

    #[test]
    fn test_default_priority() {
        assert_eq!(JobPriority::default(), JobPriority::Medium);
        assert_eq!(JobPriority::default().to_string(), "medium");
    }
}
