//! Named queues and job submission.
//!
//! A [`Queue`] binds a name and a set of [`DefaultJobOptions`] to a
//! [`JobStore`]. Producers call [`Queue::enqueue`]; worker pools subscribe to
//! the queue's notifier so a new job wakes an idle slot without waiting for the
//! next poll.

use crate::{
    JobsmithError, Result,
    clock::{Clock, SystemClock},
    job::{DefaultJobOptions, Job, JobOptions},
    store::JobStore,
};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// A named job queue backed by a store.
///
/// # Examples
///
/// ```rust
/// use jobsmith::{Queue, JobOptions, JobPriority, store::MemoryStore};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> jobsmith::Result<()> {
/// let queue = Queue::new("email", Arc::new(MemoryStore::new()));
///
/// let job = queue
///     .enqueue(
///         "welcome-email",
///         json!({"to": "user@example.com"}),
///         JobOptions::new().with_priority(JobPriority::High),
///     )
///     .await?;
/// assert_eq!(job.priority, JobPriority::High);
/// # Ok(())
/// # }
/// ```
pub struct Queue {
    name: String,
    defaults: DefaultJobOptions,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    notify: Arc<Notify>,
}

impl Queue {
    pub fn new(name: impl Into<String>, store: Arc<dyn JobStore>) -> Self {
        Self {
            name: name.into(),
            defaults: DefaultJobOptions::default(),
            store,
            clock: Arc::new(SystemClock),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Set the options applied to every job submitted to this queue.
    pub fn with_defaults(mut self, defaults: DefaultJobOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use a custom clock for creation and delay timestamps. Share it with
    /// the store so both agree on "now".
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &DefaultJobOptions {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Signalled after every successful enqueue.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Submit a job.
    ///
    /// The queue defaults are overlaid with `options`. A job with a delay is
    /// stored as delayed and becomes eligible once the delay has elapsed.
    pub async fn enqueue(
        &self,
        type_name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job> {
        if type_name.trim().is_empty() {
            return Err(JobsmithError::validation("job type name must not be empty"));
        }

        let resolved = options.merge(&self.defaults);
        if resolved.max_attempts == 0 {
            return Err(JobsmithError::validation("max_attempts must be at least 1"));
        }
        resolved.retention.validate()?;
        if resolved.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(JobsmithError::validation("timeout must be greater than zero"));
        }

        let mut job = Job::new(&self.name, type_name, payload, self.clock.now())
            .with_options(&resolved);
        if let Some(delay) = options.delay {
            job = job.with_delay(delay);
        }

        let job_id = self.store.enqueue(job.clone()).await?;
        debug!(
            queue = %self.name,
            job_id = %job_id,
            type_name = %type_name,
            priority = %job.priority,
            delayed = job.run_at > job.created_at,
            "Job enqueued"
        );

        // Wakes one idle slot now, or the next slot to wait if all are busy
        self.notify.notify_one();
        Ok(job)
    }

    /// Close the queue's store connection.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish()
    }
}
