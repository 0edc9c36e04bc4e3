//! Worker pools.
//!
//! A [`WorkerPool`] serves one queue with `concurrency` independent slots.
//! Each slot loops: wait for a rate limiter permit, claim the next job from the
//! store, run it through the [`Executor`] (raced against the job's deadline),
//! then record the outcome. Failures go through [`retry::decide`], which either
//! schedules the job again after its backoff delay or fails it for good.
//!
//! A maintenance task applies retention and, when a stall timeout is
//! configured, returns jobs stuck in `active` (for example after a crashed
//! process) to the queue.
//!
//! # Examples
//!
//! ```rust,no_run
//! use jobsmith::{
//!     Queue, WorkerConfig, WorkerPool,
//!     executor::{ProcessorRegistry, handler},
//!     rate_limit::RateLimit,
//!     store::MemoryStore,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> jobsmith::Result<()> {
//! let queue = Arc::new(Queue::new("email", Arc::new(MemoryStore::new())));
//! let registry = ProcessorRegistry::single(handler(|job| async move {
//!     Ok(json!({ "sent": job.payload["to"] }))
//! }));
//!
//! let mut pool = WorkerPool::new(
//!     queue.clone(),
//!     registry,
//!     WorkerConfig::new()
//!         .with_concurrency(5)
//!         .with_rate_limit(RateLimit::per_second(50)),
//! );
//! pool.start()?;
//!
//! queue.enqueue("send-email", json!({"to": "a@example.com"}), Default::default()).await?;
//!
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    JobsmithError, Result,
    executor::{Executor, ProcessorRegistry},
    job::{Job, JobId},
    queue::Queue,
    rate_limit::{RateLimit, RateLimiter},
    retry::{self, RetryDecision},
    stats::{JobEvent, JobEventType, StatisticsCollector},
};
use futures_util::FutureExt;
use std::{
    collections::HashSet,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, warn};

/// Settings for one worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    /// Start admission limit shared by all slots
    pub rate_limit: Option<RateLimit>,
    /// How long an idle slot waits before polling again when no enqueue
    /// notification arrives
    pub poll_interval: Duration,
    /// Deadline for jobs that carry no timeout of their own
    pub timeout: Option<Duration>,
    /// Active jobs older than this are treated as abandoned. Must exceed the
    /// longest expected execution.
    pub stall_timeout: Option<Duration>,
    /// How often retention and stalled-job recovery run
    pub maintenance_interval: Duration,
    /// First delay when the store is unavailable; doubles per failure
    pub store_retry_delay: Duration,
    /// Cap on the store retry delay
    pub max_store_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limit: None,
            poll_interval: Duration::from_secs(1),
            timeout: None,
            stall_timeout: None,
            maintenance_interval: Duration::from_secs(30),
            store_retry_delay: Duration::from_millis(100),
            max_store_retry_delay: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = Some(stall_timeout);
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_store_retry_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.store_retry_delay = initial;
        self.max_store_retry_delay = max;
        self
    }

    /// Delay before the `failures`-th consecutive store retry.
    pub fn store_backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.store_retry_delay
            .saturating_mul(factor)
            .min(self.max_store_retry_delay)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(JobsmithError::Config(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(JobsmithError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(JobsmithError::Config(
                "maintenance interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// State shared by the tasks of one running pool.
struct PoolContext {
    queue: Arc<Queue>,
    executor: Executor,
    config: WorkerConfig,
    rate_limiter: Option<RateLimiter>,
    stats_collector: Option<Arc<dyn StatisticsCollector>>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl PoolContext {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn is_stopping(shutdown: &watch::Receiver<bool>) -> bool {
        *shutdown.borrow()
    }

    fn track(&self, job_id: JobId, running: bool) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running {
            in_flight.insert(job_id);
        } else {
            in_flight.remove(&job_id);
        }
    }

    fn in_flight(&self) -> Vec<JobId> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }

    async fn run_slot(self: Arc<Self>, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(queue = %self.name(), slot, "Worker slot started");
        let notify = self.queue.notifier();
        let mut store_failures = 0u32;

        loop {
            if Self::is_stopping(&shutdown) {
                break;
            }

            if let Some(limiter) = &self.rate_limiter {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    acquired = limiter.acquire() => {
                        if let Err(e) = acquired {
                            error!(queue = %self.name(), slot, error = %e, "Rate limiter failed");
                            sleep(self.config.poll_interval).await;
                            continue;
                        }
                    }
                }
            }

            match self.queue.store().dequeue_next(self.name()).await {
                Ok(Some(job)) => {
                    store_failures = 0;
                    self.process_job(job, &shutdown).await;
                }
                Ok(None) => {
                    store_failures = 0;
                    if let Some(limiter) = &self.rate_limiter {
                        limiter.refund();
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = notify.notified() => {}
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    if let Some(limiter) = &self.rate_limiter {
                        limiter.refund();
                    }
                    store_failures += 1;
                    let delay = self.config.store_backoff(store_failures);
                    warn!(
                        queue = %self.name(),
                        slot,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Error dequeuing job"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        debug!(queue = %self.name(), slot, "Worker slot stopped");
    }

    async fn process_job(&self, job: Job, shutdown: &watch::Receiver<bool>) {
        let job_id = job.id;
        let attempt = job.attempts_made + 1;
        self.track(job_id, true);

        self.record_event(&job, JobEventType::Started, None, None)
            .await;

        let started = Instant::now();
        let timeout = job.timeout.or(self.config.timeout);
        let execution = AssertUnwindSafe(self.executor.execute(job.clone())).catch_unwind();

        let outcome = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job_id = %job_id, queue = %self.name(), ?timeout, "Job timed out");
                    self.record_event(
                        &job,
                        JobEventType::TimedOut,
                        Some(timeout.as_millis() as u64),
                        Some(format!("Job timed out after {:?}", timeout)),
                    )
                    .await;
                    Ok(Err(JobsmithError::Timeout { timeout }))
                }
            },
            None => execution.await,
        };
        let outcome = outcome.unwrap_or_else(|_| Err(JobsmithError::handler("handler panicked")));
        let processing_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let store = Arc::clone(self.queue.store());
                let recorded = self
                    .report(job_id, "completion", shutdown, || {
                        let store = Arc::clone(&store);
                        let result = result.clone();
                        async move { store.mark_completed(job_id, result).await }
                    })
                    .await;

                if recorded {
                    debug!(job_id = %job_id, queue = %self.name(), attempt, processing_time_ms, "Job completed");
                    self.record_event(&job, JobEventType::Completed, Some(processing_time_ms), None)
                        .await;
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                self.handle_failure(&job, message, processing_time_ms, shutdown)
                    .await;
            }
        }

        self.track(job_id, false);
    }

    async fn handle_failure(
        &self,
        job: &Job,
        message: String,
        processing_time_ms: u64,
        shutdown: &watch::Receiver<bool>,
    ) {
        let job_id = job.id;
        let store = Arc::clone(self.queue.store());

        match retry::decide(job.attempts_made, job.max_attempts, &job.backoff) {
            RetryDecision::Retry {
                attempts_made,
                delay,
            } => {
                let recorded = self
                    .report(job_id, "retry", shutdown, || {
                        let store = Arc::clone(&store);
                        let message = message.clone();
                        async move { store.requeue_with_delay(job_id, delay, &message).await }
                    })
                    .await;

                if recorded {
                    info!(
                        job_id = %job_id,
                        queue = %self.name(),
                        attempts = attempts_made,
                        max_attempts = job.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Job failed, retrying"
                    );
                    self.record_event(
                        job,
                        JobEventType::Retried { delay },
                        Some(processing_time_ms),
                        Some(message),
                    )
                    .await;
                    // The retry may already be due when the delay is zero
                    self.queue.notifier().notify_one();
                }
            }
            RetryDecision::Fail { attempts_made } => {
                let recorded = self
                    .report(job_id, "failure", shutdown, || {
                        let store = Arc::clone(&store);
                        let message = message.clone();
                        async move { store.mark_failed(job_id, &message).await }
                    })
                    .await;

                if recorded {
                    warn!(
                        job_id = %job_id,
                        queue = %self.name(),
                        attempts = attempts_made,
                        error = %message,
                        "Job failed permanently"
                    );
                    self.record_event(
                        job,
                        JobEventType::Failed,
                        Some(processing_time_ms),
                        Some(message),
                    )
                    .await;
                }
            }
        }
    }

    /// Record a job outcome, retrying while the store is unavailable.
    ///
    /// Retries continue until the outcome is stored or the pool is stopping;
    /// in the latter case the job stays `active` for stalled-job recovery.
    async fn report<F, Fut>(
        &self,
        job_id: JobId,
        outcome: &str,
        shutdown: &watch::Receiver<bool>,
        op: F,
    ) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Job>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(_) => return true,
                Err(e) if e.is_transient() => {
                    if Self::is_stopping(shutdown) && failures > 0 {
                        error!(
                            job_id = %job_id,
                            queue = %self.name(),
                            outcome,
                            error = %e,
                            "Store unavailable while stopping, job left active"
                        );
                        return false;
                    }
                    failures += 1;
                    let delay = self.config.store_backoff(failures);
                    warn!(
                        job_id = %job_id,
                        queue = %self.name(),
                        outcome,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to record job outcome, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(job_id = %job_id, queue = %self.name(), outcome, error = %e, "Failed to record job outcome");
                    return false;
                }
            }
        }
    }

    async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(self.config.maintenance_interval) => {}
            }

            match self.queue.store().evict(self.name()).await {
                Ok(0) => {}
                Ok(evicted) => debug!(queue = %self.name(), evicted, "Applied retention"),
                Err(e) => warn!(queue = %self.name(), error = %e, "Retention sweep failed"),
            }

            let Some(stall_timeout) = self.config.stall_timeout else {
                continue;
            };
            let stall_timeout =
                chrono::Duration::from_std(stall_timeout).unwrap_or(chrono::Duration::MAX);
            let Some(cutoff) = self.queue.clock().now().checked_sub_signed(stall_timeout) else {
                continue;
            };

            let exclude = self.in_flight();
            match self
                .queue
                .store()
                .recover_stalled(self.name(), cutoff, &exclude)
                .await
            {
                Ok(recovered) if !recovered.is_empty() => {
                    warn!(queue = %self.name(), count = recovered.len(), "Recovered stalled jobs");
                    for _ in &recovered {
                        self.queue.notifier().notify_one();
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(queue = %self.name(), error = %e, "Stalled job check failed"),
            }
        }
    }

    async fn record_event(
        &self,
        job: &Job,
        event_type: JobEventType,
        processing_time_ms: Option<u64>,
        error_message: Option<String>,
    ) {
        if let Some(stats_collector) = &self.stats_collector {
            let event = JobEvent {
                job_id: job.id,
                queue_name: job.queue_name.clone(),
                event_type,
                priority: job.priority,
                attempt: job.attempts_made + 1,
                processing_time_ms,
                error_message,
                timestamp: self.queue.clock().now(),
            };
            if let Err(e) = stats_collector.record_event(event).await {
                warn!("Failed to record statistics event: {}", e);
            }
        }
    }
}

/// Concurrent executors for one queue.
pub struct WorkerPool {
    context: Arc<PoolContext>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<Queue>, registry: ProcessorRegistry, config: WorkerConfig) -> Self {
        let executor = Executor::new(registry).with_clock(Arc::clone(queue.clock()));
        let rate_limiter = config.rate_limit.map(RateLimiter::new);
        Self {
            context: Arc::new(PoolContext {
                queue,
                executor,
                config,
                rate_limiter,
                stats_collector: None,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            }),
            shutdown_tx: None,
            handles: Vec::new(),
        }
    }

    /// Report job events to `stats_collector`. Only effective before
    /// [`start`](Self::start).
    pub fn with_stats_collector(mut self, stats_collector: Arc<dyn StatisticsCollector>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.stats_collector = Some(stats_collector);
        }
        self
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.context.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.context.config
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.context.rate_limiter.as_ref()
    }

    /// Get the statistics collector for the worker pool
    pub fn stats_collector(&self) -> Option<Arc<dyn StatisticsCollector>> {
        self.context.stats_collector.clone()
    }

    /// Ids of the jobs this pool is executing right now.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.context.in_flight()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Spawn the worker slots and the maintenance task. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(JobsmithError::Worker {
                message: format!("worker pool for '{}' is already running", self.context.name()),
            });
        }
        self.context.config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.context.config.concurrency;

        info!(
            queue = %self.context.name(),
            concurrency,
            rate_limit = ?self.context.config.rate_limit,
            "Starting worker pool"
        );

        for slot in 0..concurrency {
            let context = Arc::clone(&self.context);
            let shutdown = shutdown_rx.clone();
            self.handles
                .push(tokio::spawn(context.run_slot(slot, shutdown)));
        }
        let context = Arc::clone(&self.context);
        self.handles
            .push(tokio::spawn(context.run_maintenance(shutdown_rx)));

        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Stop admitting jobs and wait for in-flight executions to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };

        info!(
            queue = %self.context.name(),
            in_flight = self.context.in_flight().len(),
            "Shutting down worker pool"
        );
        // Receivers observe the change even if they are mid-job
        let _ = shutdown_tx.send(true);

        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(queue = %self.context.name(), error = %e, "Worker task failed");
                panicked += 1;
            }
        }

        info!(queue = %self.context.name(), "Worker pool stopped");
        if panicked > 0 {
            return Err(JobsmithError::Worker {
                message: format!("{} worker task(s) failed during shutdown", panicked),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue", &self.context.name())
            .field("config", &self.context.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TokioClock,
        executor::handler,
        job::{JobOptions, JobStatus},
        retry::BackoffPolicy,
        store::{JobStore, MemoryStore},
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn queue() -> (Arc<Queue>, Arc<MemoryStore>) {
        let clock = Arc::new(TokioClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let queue = Arc::new(Queue::new("test_queue", store.clone()).with_clock(clock));
        (queue, store)
    }

    async fn wait_for_status(store: &MemoryStore, job_id: JobId, status: JobStatus) -> Job {
        for _ in 0..60_000 {
            if let Some(job) = store.get_by_id(job_id).await.unwrap() {
                if job.status == status {
                    return job;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }

    #[test]
    fn test_store_backoff() {
        let config = WorkerConfig::new()
            .with_store_retry_delay(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(config.store_backoff(1), Duration::from_millis(100));
        assert_eq!(config.store_backoff(2), Duration::from_millis(200));
        assert_eq!(config.store_backoff(3), Duration::from_millis(400));
        assert_eq!(config.store_backoff(4), Duration::from_millis(500));
        assert_eq!(config.store_backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = WorkerConfig::new().with_concurrency(0);
        assert!(matches!(config.validate(), Err(JobsmithError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_completes_job_with_result() {
        let (queue, store) = queue();
        let registry = ProcessorRegistry::single(handler(|job| async move {
            Ok(json!({ "echo": job.payload }))
        }));
        let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new());
        pool.start().unwrap();

        let job = queue
            .enqueue("send-email", json!({"to": "a"}), JobOptions::new())
            .await
            .unwrap();
        let done = wait_for_status(&store, job.id, JobStatus::Completed).await;
        assert_eq!(done.result, Some(json!({"echo": {"to": "a"}})));
        assert_eq!(done.attempts_made, 1);

        pool.stop().await.unwrap();
        assert!(!pool.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let (queue, _store) = queue();
        let registry = ProcessorRegistry::single(handler(|_job| async { Ok(json!(null)) }));
        let mut pool = WorkerPool::new(queue, registry, WorkerConfig::new());

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(JobsmithError::Worker { .. })));
        pool.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (queue, store) = queue();
        let registry = ProcessorRegistry::single(handler(|_job| async {
            sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        }));
        let mut pool = WorkerPool::new(
            queue.clone(),
            registry,
            WorkerConfig::new().with_timeout(Duration::from_secs(1)),
        );
        pool.start().unwrap();

        let job = queue
            .enqueue(
                "process-data",
                json!({}),
                JobOptions::new().with_max_attempts(1),
            )
            .await
            .unwrap();
        let failed = wait_for_status(&store, job.id, JobStatus::Failed).await;
        assert_eq!(failed.last_error.as_deref(), Some("Job timed out after 1s"));

        pool.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_is_a_failure() {
        let (queue, store) = queue();
        let registry = ProcessorRegistry::single(handler(|job| async move {
            if job.payload["explode"].as_bool().unwrap_or(false) {
                panic!("boom");
            }
            Ok(json!(null))
        }));
        let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new());
        pool.start().unwrap();

        let job = queue
            .enqueue(
                "process-data",
                json!({"explode": true}),
                JobOptions::new().with_max_attempts(1),
            )
            .await
            .unwrap();
        let failed = wait_for_status(&store, job.id, JobStatus::Failed).await;
        assert_eq!(failed.last_error.as_deref(), Some("Handler error: handler panicked"));

        // The slot survived the panic
        let next = queue
            .enqueue("process-data", json!({}), JobOptions::new())
            .await
            .unwrap();
        wait_for_status(&store, next.id, JobStatus::Completed).await;

        pool.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_in_flight_job() {
        let (queue, store) = queue();
        let registry = ProcessorRegistry::single(handler(|_job| async {
            sleep(Duration::from_secs(5)).await;
            Ok(json!("finished"))
        }));
        let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new());
        pool.start().unwrap();

        let job = queue
            .enqueue("report-generation", json!({}), JobOptions::new())
            .await
            .unwrap();
        wait_for_status(&store, job.id, JobStatus::Active).await;
        assert_eq!(pool.active_jobs(), vec![job.id]);

        pool.stop().await.unwrap();

        let job = store.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(pool.active_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_job_recovered() {
        let (queue, store) = queue();

        // A job claimed by a worker that vanished
        let abandoned = queue
            .enqueue("data-export", json!({}), JobOptions::new())
            .await
            .unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        let executions = Arc::new(AtomicU32::new(0));
        let counter = executions.clone();
        let registry = ProcessorRegistry::single(handler(move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        }));
        let mut pool = WorkerPool::new(
            queue.clone(),
            registry,
            WorkerConfig::new()
                .with_stall_timeout(Duration::from_secs(60))
                .with_maintenance_interval(Duration::from_secs(30)),
        );
        pool.start().unwrap();

        let job = wait_for_status(&store, abandoned.id, JobStatus::Completed).await;
        // One attempt lost to the stall, one successful
        assert_eq!(job.attempts_made, 2);
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        pool.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_retries() {
        let (queue, store) = queue();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let registry = ProcessorRegistry::single(handler(move |_job| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(JobsmithError::handler("first try fails"))
                } else {
                    Ok(json!(null))
                }
            }
        }));
        let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new());
        pool.start().unwrap();

        let started = Instant::now();
        let job = queue
            .enqueue(
                "image-processing",
                json!({}),
                JobOptions::new()
                    .with_max_attempts(2)
                    .with_backoff(BackoffPolicy::fixed(5000)),
            )
            .await
            .unwrap();
        let done = wait_for_status(&store, job.id, JobStatus::Completed).await;

        assert_eq!(done.attempts_made, 2);
        assert_eq!(done.last_error.as_deref(), Some("Handler error: first try fails"));
        assert!(started.elapsed() >= Duration::from_millis(5000));

        pool.stop().await.unwrap();
    }
}
