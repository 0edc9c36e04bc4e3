//! Jobs, their options and the externally visible job view.

use crate::{
    JobsmithError, Result,
    priority::JobPriority,
    retry::BackoffPolicy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type JobId = Uuid;

/// Lifecycle state of a job.
///
/// `Completed` and `Failed` are terminal: a job in either state is never
/// dequeued again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn all() -> [JobStatus; 5] {
        [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Delayed,
            JobStatus::Completed,
            JobStatus::Failed,
        ]
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Delayed => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobsmithError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "delayed" => Ok(JobStatus::Delayed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobsmithError::validation(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// How many terminal records of one kind a queue keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Never evict.
    #[default]
    KeepAll,
    /// Drop the record as soon as it becomes terminal.
    RemoveImmediately,
    /// Evict records older than `max_age_secs` and everything beyond the
    /// newest `max_count`.
    Keep {
        max_age_secs: Option<u64>,
        max_count: Option<usize>,
    },
}

/// Longest age a `Keep` policy accepts, one hundred years.
pub const MAX_RETENTION_AGE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl RetentionPolicy {
    pub fn keep(max_age_secs: Option<u64>, max_count: Option<usize>) -> Self {
        RetentionPolicy::Keep {
            max_age_secs,
            max_count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            RetentionPolicy::Keep {
                max_age_secs: Some(secs),
                ..
            } if *secs > MAX_RETENTION_AGE_SECS => Err(JobsmithError::validation(format!(
                "retention max_age_secs {} exceeds the limit of {}",
                secs, MAX_RETENTION_AGE_SECS
            ))),
            _ => Ok(()),
        }
    }
}

/// Retention for completed and failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Retention {
    pub on_complete: RetentionPolicy,
    pub on_fail: RetentionPolicy,
}

impl Retention {
    /// Policy for records in `status`. Jobs still in flight are never evicted.
    pub fn for_status(&self, status: JobStatus) -> RetentionPolicy {
        match status {
            JobStatus::Completed => self.on_complete,
            JobStatus::Failed => self.on_fail,
            JobStatus::Waiting | JobStatus::Active | JobStatus::Delayed => {
                RetentionPolicy::KeepAll
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.on_complete.validate()?;
        self.on_fail.validate()
    }
}

/// Options a queue applies to every job it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultJobOptions {
    pub priority: JobPriority,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
    #[serde(
        default,
        rename = "timeout_ms",
        with = "option_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl Default for DefaultJobOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::default(),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            retention: Retention::default(),
            timeout: None,
        }
    }
}

/// Per-enqueue overrides. Fields left as `None` fall back to the queue's
/// [`DefaultJobOptions`].
///
/// # Examples
///
/// ```rust
/// use jobsmith::{JobOptions, JobPriority};
/// use std::time::Duration;
///
/// let options = JobOptions::new()
///     .with_priority(JobPriority::High)
///     .with_max_attempts(5)
///     .with_delay(Duration::from_secs(1));
/// assert_eq!(options.max_attempts, Some(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct JobOptions {
    #[serde(default)]
    pub priority: Option<JobPriority>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<BackoffPolicy>,
    #[serde(default, rename = "delay_ms", with = "option_millis")]
    pub delay: Option<Duration>,
    #[serde(default, rename = "timeout_ms", with = "option_millis")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retention: Option<Retention>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from an inbound request body.
    ///
    /// Anything that does not fit (an unsupported priority tier, unknown
    /// fields, wrong types) is reported as a validation failure.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| JobsmithError::validation(format!("invalid job options: {}", e)))
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Overlay these options on the queue defaults. Explicit fields win.
    pub fn merge(&self, defaults: &DefaultJobOptions) -> DefaultJobOptions {
        DefaultJobOptions {
            priority: self.priority.unwrap_or(defaults.priority),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            retention: self.retention.unwrap_or(defaults.retention),
            timeout: self.timeout.or(defaults.timeout),
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub type_name: String,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
    #[serde(default, rename = "timeout_ms", with = "option_millis")]
    pub timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Enqueue order within the store; breaks priority ties.
    pub sequence: u64,
}

impl Job {
    pub fn new(
        queue_name: impl Into<String>,
        type_name: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let defaults = DefaultJobOptions::default();
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            type_name: type_name.into(),
            payload,
            priority: defaults.priority,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: defaults.max_attempts,
            backoff: defaults.backoff,
            retention: defaults.retention,
            timeout: defaults.timeout,
            created_at,
            run_at: created_at,
            processing_started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
            sequence: 0,
        }
    }

    /// Apply resolved options to a freshly created job.
    pub fn with_options(mut self, options: &DefaultJobOptions) -> Self {
        self.priority = options.priority;
        self.max_attempts = options.max_attempts;
        self.backoff = options.backoff;
        self.retention = options.retention;
        self.timeout = options.timeout;
        self
    }

    /// Hold the job back until `delay` has elapsed.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        if delay.is_zero() {
            return self;
        }
        self.run_at = add_delay(self.created_at, delay);
        self.status = JobStatus::Delayed;
        self
    }

    /// `queueName:id`, accepted by lookups that do not know the owning queue.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.queue_name, self.id)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Waiting | JobStatus::Delayed) && self.run_at <= now
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Time spent in the last execution, if it finished.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.processing_started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(finished - started),
            _ => None,
        }
    }
}

/// Serializes optional durations as whole milliseconds.
pub(crate) mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// `time + delay`, saturating at the largest representable time.
pub(crate) fn add_delay(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| time.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Externally visible rendering of a job.
///
/// `status` is derived from the timestamps and outcome fields rather than
/// copied from the stored status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timestamp: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobView {
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            id: job.id.to_string(),
            queue: job.queue_name.clone(),
            name: job.type_name.clone(),
            data: job.payload.clone(),
            status: derive_status(job, now),
            priority: job.priority.as_i32(),
            attempts: job.attempts_made,
            max_attempts: job.max_attempts,
            timestamp: job.created_at,
            processed_on: job.processing_started_at,
            finished_on: job.finished_at,
            failed_reason: job.last_error.clone(),
            result: job.result.clone(),
        }
    }
}

/// Lifecycle state as seen from the job's timestamps.
///
/// A finished job is completed when it holds a result; completion always
/// records one, failure never does.
pub fn derive_status(job: &Job, now: DateTime<Utc>) -> JobStatus {
    if job.finished_at.is_some() {
        if job.result.is_none() && job.last_error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    } else if job.processing_started_at.is_some() {
        JobStatus::Active
    } else if job.run_at > now {
        JobStatus::Delayed
    } else {
        JobStatus::Waiting
    }
}
