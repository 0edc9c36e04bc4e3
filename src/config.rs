//! Configuration management for jobsmith.
//!
//! Settings are read from a TOML file, from `JOBSMITH_*` environment
//! variables, or built in code. Durations are written in a human-readable form
//! such as `"250ms"`, `"30s"`, `"5m"`, `"1h"` or `"7d"`.
//!
//! # Examples
//!
//! ```rust
//! use jobsmith::config::JobsmithConfig;
//!
//! let config = JobsmithConfig::new().with_max_concurrency(8);
//! let email = config.worker_config("email");
//! assert_eq!(email.concurrency, 8);
//!
//! let processing = config.worker_config("processing");
//! assert_eq!(processing.concurrency, 4);
//! ```

use crate::{
    JobsmithError, Result,
    job::DefaultJobOptions,
    presets,
    rate_limit::RateLimit,
    worker::WorkerConfig,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};

/// Serializes `Duration` as strings like "250ms", "30s", "5m", "1h", "2d".
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(D::Error::custom)
    }

    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis == 0 {
            return "0s".to_string();
        }
        if millis % 1000 != 0 {
            return format!("{}ms", millis);
        }

        let secs = duration.as_secs();
        if secs % 86400 == 0 {
            format!("{}d", secs / 86400)
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }

    /// Parse a duration string like "250ms", "30s", "5m", "1h" or "90" (seconds).
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();

        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        let (num_str, unit) = match s.strip_suffix("ms") {
            Some(num) => (num, "ms"),
            None if s.len() >= 2 => s.split_at(s.len() - 1),
            None => return Err(format!("Invalid duration format: {}", s)),
        };
        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

        let secs = |factor: u64| {
            num.checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("Duration out of range: {}", s))
        };
        match unit {
            "ms" => Ok(Duration::from_millis(num)),
            "s" => secs(1),
            "m" => secs(60),
            "h" => secs(3600),
            "d" => secs(86400),
            _ => Err(format!(
                "Invalid duration suffix: {}. Use ms, s, m, h, or d",
                unit
            )),
        }
    }
}

/// `Option<Duration>` in the same string format.
mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_str(&super::duration_str::format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::duration_str::parse_duration(&s)
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

pub use duration_str::parse_duration;

/// Main configuration structure for jobsmith
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JobsmithConfig {
    /// Settings shared by all worker pools
    pub worker: WorkerSettings,

    /// Per-queue overrides, keyed by queue name
    pub queues: BTreeMap<String, QueueSettings>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Settings shared by all worker pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Base concurrency; heavy queues run at a fraction of it
    pub max_concurrency: usize,

    /// Idle poll interval
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,

    /// How often retention and stalled-job recovery run
    #[serde(with = "duration_str")]
    pub maintenance_interval: Duration,

    /// Active jobs older than this are returned to their queue
    #[serde(
        default,
        with = "option_duration_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub stall_timeout: Option<Duration>,

    /// First delay after a store failure
    #[serde(with = "duration_str")]
    pub store_retry_delay: Duration,

    /// Cap on the store retry delay
    #[serde(with = "duration_str")]
    pub max_store_retry_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let pool = WorkerConfig::default();
        Self {
            max_concurrency: 5,
            poll_interval: pool.poll_interval,
            maintenance_interval: pool.maintenance_interval,
            stall_timeout: None,
            store_retry_delay: pool.store_retry_delay,
            max_store_retry_delay: pool.max_store_retry_delay,
        }
    }
}

/// Overrides for one queue. Unset fields keep the queue's preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueueSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Deadline for jobs without their own timeout
    #[serde(
        default,
        with = "option_duration_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

/// Logging and tracing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (`info`, `jobsmith=debug`, ...)
    pub level: String,

    /// Whether to enable structured JSON logging
    pub json_format: bool,

    /// Whether to include file and line information
    pub include_location: bool,

    /// Whether to include the module path of each event
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl JobsmithConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.worker.max_concurrency = max_concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.worker.poll_interval = interval;
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.worker.stall_timeout = Some(stall_timeout);
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.logging.level = level.to_string();
        self
    }

    /// Set overrides for one queue
    pub fn with_queue(mut self, name: &str, settings: QueueSettings) -> Self {
        self.queues.insert(name.to_string(), settings);
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from environment variables
    ///
    /// Reads `JOBSMITH_MAX_CONCURRENCY`, `JOBSMITH_POLL_INTERVAL_MS`,
    /// `JOBSMITH_LOG_LEVEL` and `JOBSMITH_LOG_JSON`; unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var("JOBSMITH_MAX_CONCURRENCY") {
            config.worker.max_concurrency = parse_env("JOBSMITH_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = env_var("JOBSMITH_POLL_INTERVAL_MS") {
            config.worker.poll_interval =
                Duration::from_millis(parse_env("JOBSMITH_POLL_INTERVAL_MS", &value)?);
        }
        if let Some(level) = env_var("JOBSMITH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(value) = env_var("JOBSMITH_LOG_JSON") {
            config.logging.json_format = parse_env("JOBSMITH_LOG_JSON", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values a pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrency == 0 {
            return Err(JobsmithError::Config(
                "worker.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.worker.poll_interval.is_zero() {
            return Err(JobsmithError::Config(
                "worker.poll_interval must be greater than zero".to_string(),
            ));
        }
        for (name, queue) in &self.queues {
            if queue.concurrency == Some(0) {
                return Err(JobsmithError::Config(format!(
                    "queues.{}.concurrency must be at least 1",
                    name
                )));
            }
            if queue.max_attempts == Some(0) {
                return Err(JobsmithError::Config(format!(
                    "queues.{}.max_attempts must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Pool settings for `queue_name`: the queue's preset (or the generic
    /// defaults) with the shared worker settings and the queue's overrides
    /// applied.
    pub fn worker_config(&self, queue_name: &str) -> WorkerConfig {
        let max_concurrency = self.worker.max_concurrency;
        let mut pool = presets::pool_for(queue_name, max_concurrency)
            .unwrap_or_else(|| WorkerConfig::new().with_concurrency(max_concurrency));

        pool.poll_interval = self.worker.poll_interval;
        pool.maintenance_interval = self.worker.maintenance_interval;
        pool.stall_timeout = self.worker.stall_timeout;
        pool.store_retry_delay = self.worker.store_retry_delay;
        pool.max_store_retry_delay = self.worker.max_store_retry_delay;

        if let Some(overrides) = self.queues.get(queue_name) {
            if let Some(concurrency) = overrides.concurrency {
                pool.concurrency = concurrency;
            }
            if let Some(rate_limit) = overrides.rate_limit {
                pool.rate_limit = Some(rate_limit);
            }
            if overrides.timeout.is_some() {
                pool.timeout = overrides.timeout;
            }
        }
        pool
    }

    /// Job defaults for `queue_name` with the queue's overrides applied.
    pub fn job_defaults(&self, queue_name: &str) -> DefaultJobOptions {
        let mut defaults = presets::defaults_for(queue_name).unwrap_or_default();
        if let Some(overrides) = self.queues.get(queue_name) {
            if let Some(max_attempts) = overrides.max_attempts {
                defaults.max_attempts = max_attempts;
            }
            if overrides.timeout.is_some() {
                defaults.timeout = overrides.timeout;
            }
        }
        defaults
    }
}

/// Helper functions for creating configurations
impl JobsmithConfig {
    /// Create a configuration for development use
    pub fn development() -> Self {
        Self {
            worker: WorkerSettings {
                max_concurrency: 2,
                poll_interval: Duration::from_millis(100),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                include_location: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for production use
    pub fn production() -> Self {
        Self {
            worker: WorkerSettings {
                max_concurrency: 10,
                stall_timeout: Some(Duration::from_secs(15 * 60)),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: true,
                include_target: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| JobsmithError::Config(format!("invalid value for {}: '{}'", name, value)))
}
