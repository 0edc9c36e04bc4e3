//! In-memory implementation of the [`JobStore`] contract.
//!
//! `MemoryStore` keeps all queues of a process in one structure behind a
//! single async lock, which makes every operation atomic. It is the reference
//! implementation for persistent stores and the store used by tests.
//!
//! # Examples
//!
//! ```rust
//! use jobsmith::store::{JobStore, MemoryStore};
//! use jobsmith::{Job, JobStatus};
//! use chrono::Utc;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//!
//! let job = Job::new("email", "send-email", json!({"to": "a@example.com"}), Utc::now());
//! let job_id = store.enqueue(job).await?;
//!
//! let claimed = store.dequeue_next("email").await?.unwrap();
//! assert_eq!(claimed.id, job_id);
//! assert_eq!(claimed.status, JobStatus::Active);
//!
//! store.mark_completed(job_id, json!({"messageId": "m-1"})).await?;
//! assert_eq!(store.counts_by_queue("email").await?.completed, 1);
//! # Ok(())
//! # }
//! ```

use crate::{
    JobsmithError, Result,
    clock::{Clock, SystemClock},
    job::{Job, JobId, JobStatus, RetentionPolicy, add_delay},
    priority::JobPriority,
    store::{JobCounts, JobStore, Removal},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-queue indexes over the job table
#[derive(Debug, Default)]
struct QueueIndex {
    /// Dequeue order: priority value, then enqueue sequence
    waiting: BTreeSet<(JobPriority, u64, JobId)>,
    /// Promotion order: run_at, then enqueue sequence
    delayed: BTreeSet<(DateTime<Utc>, u64, JobId)>,
    active: HashSet<JobId>,
    completed: HashSet<JobId>,
    failed: HashSet<JobId>,
}

impl QueueIndex {
    fn insert(&mut self, job: &Job) {
        match job.status {
            JobStatus::Waiting => {
                self.waiting.insert((job.priority, job.sequence, job.id));
            }
            JobStatus::Delayed => {
                self.delayed.insert((job.run_at, job.sequence, job.id));
            }
            JobStatus::Active => {
                self.active.insert(job.id);
            }
            JobStatus::Completed => {
                self.completed.insert(job.id);
            }
            JobStatus::Failed => {
                self.failed.insert(job.id);
            }
        }
    }

    fn remove(&mut self, job: &Job) {
        match job.status {
            JobStatus::Waiting => {
                self.waiting.remove(&(job.priority, job.sequence, job.id));
            }
            JobStatus::Delayed => {
                self.delayed.remove(&(job.run_at, job.sequence, job.id));
            }
            JobStatus::Active => {
                self.active.remove(&job.id);
            }
            JobStatus::Completed => {
                self.completed.remove(&job.id);
            }
            JobStatus::Failed => {
                self.failed.remove(&job.id);
            }
        }
    }

    fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len() as u64,
            active: self.active.len() as u64,
            completed: self.completed.len() as u64,
            failed: self.failed.len() as u64,
            delayed: self.delayed.len() as u64,
        }
    }

    fn ids(&self, status: JobStatus) -> Vec<JobId> {
        match status {
            JobStatus::Waiting => self.waiting.iter().map(|(_, _, id)| *id).collect(),
            JobStatus::Delayed => self.delayed.iter().map(|(_, _, id)| *id).collect(),
            JobStatus::Active => self.active.iter().copied().collect(),
            JobStatus::Completed => self.completed.iter().copied().collect(),
            JobStatus::Failed => self.failed.iter().copied().collect(),
        }
    }
}

/// In-memory storage for the store
#[derive(Debug, Default)]
struct Storage {
    /// All jobs stored by ID
    jobs: HashMap<JobId, Job>,
    /// Indexes by queue name
    queues: HashMap<String, QueueIndex>,
    /// Active jobs whose removal was requested while they were running
    pending_removal: HashSet<JobId>,
    /// Enqueue counter used to keep FIFO order within a priority tier
    next_sequence: u64,
}

impl Storage {
    fn index(&mut self, queue_name: &str) -> &mut QueueIndex {
        self.queues.entry(queue_name.to_string()).or_default()
    }

    /// Move a job to a new state, keeping the indexes in step.
    fn transition(&mut self, job_id: JobId, update: impl FnOnce(&mut Job)) -> Result<Job> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;

        let before = job.clone();
        update(job);
        let after = job.clone();

        let index = self.index(&after.queue_name);
        index.remove(&before);
        index.insert(&after);
        Ok(after)
    }

    fn require_active(&self, job_id: JobId, target: JobStatus) -> Result<&Job> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if job.status != JobStatus::Active {
            return Err(JobsmithError::InvalidTransition {
                id: job_id.to_string(),
                from: job.status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(job)
    }

    fn delete(&mut self, job_id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&job_id)?;
        if let Some(index) = self.queues.get_mut(&job.queue_name) {
            index.remove(&job);
        }
        self.pending_removal.remove(&job_id);
        Some(job)
    }

    /// Drop the record if a removal was requested while the job ran.
    fn settle_pending_removal(&mut self, job_id: JobId) {
        if self.pending_removal.contains(&job_id) {
            debug!(job_id = %job_id, "Removing job after its execution finished");
            self.delete(job_id);
        }
    }

    /// Promote delayed jobs of a queue whose run time has arrived.
    fn promote_due(&mut self, queue_name: &str, now: DateTime<Utc>) -> usize {
        let due: Vec<JobId> = match self.queues.get(queue_name) {
            Some(index) => index
                .delayed
                .iter()
                .take_while(|(run_at, _, _)| *run_at <= now)
                .map(|(_, _, id)| *id)
                .collect(),
            None => return 0,
        };

        for job_id in &due {
            let _ = self.transition(*job_id, |job| job.status = JobStatus::Waiting);
        }
        due.len()
    }

    /// Evict terminal jobs of one state according to `policy`.
    fn sweep(
        &mut self,
        queue_name: &str,
        status: JobStatus,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> usize {
        let (max_age_secs, max_count) = match policy {
            RetentionPolicy::KeepAll => return 0,
            RetentionPolicy::RemoveImmediately => (Some(0), Some(0)),
            RetentionPolicy::Keep {
                max_age_secs,
                max_count,
            } => (max_age_secs, max_count),
        };

        let ids = match self.queues.get(queue_name) {
            Some(index) => index.ids(status),
            None => return 0,
        };

        let mut finished: Vec<(DateTime<Utc>, u64, JobId)> = ids
            .into_iter()
            .filter_map(|id| self.jobs.get(&id))
            .map(|job| (job.finished_at.unwrap_or(job.created_at), job.sequence, job.id))
            .collect();
        // Newest first
        finished.sort_by(|a, b| b.cmp(a));

        let cutoff = max_age_secs.and_then(|secs| retention_cutoff(now, secs));
        let evict: Vec<JobId> = finished
            .iter()
            .enumerate()
            .filter(|(position, (finished_at, _, _))| {
                let too_many = max_count.is_some_and(|max| *position >= max);
                let too_old = cutoff.is_some_and(|cutoff| *finished_at <= cutoff);
                too_many || too_old
            })
            .map(|(_, (_, _, id))| *id)
            .collect();

        for job_id in &evict {
            self.delete(*job_id);
        }
        evict.len()
    }

    /// Apply the finished job's retention to its queue.
    fn apply_retention(&mut self, job: &Job, now: DateTime<Utc>) {
        let policy = job.retention.for_status(job.status);
        let evicted = self.sweep(&job.queue_name, job.status, policy, now);
        if evicted > 0 {
            debug!(queue = %job.queue_name, status = %job.status, evicted, "Evicted finished jobs");
        }
    }
}

/// Oldest finish time a record of age `max_age_secs` may have. `None` when the
/// age reaches past the representable range, which means nothing is too old.
fn retention_cutoff(now: DateTime<Utc>, max_age_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(max_age_secs).ok()?;
    let age = chrono::Duration::try_seconds(secs)?;
    now.checked_sub_signed(age)
}

/// In-memory job store.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MemoryStore {
    storage: Arc<RwLock<Storage>>,
    clock: Arc<dyn Clock>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a store that reads the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store with a custom clock, typically shared with the queues
    /// that write into it.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::default())),
            clock,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Number of records held across all queues.
    pub async fn len(&self) -> usize {
        self.storage.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JobsmithError::unavailable("store connection is closed"));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("clock", &self.clock)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, mut job: Job) -> Result<JobId> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        if storage.jobs.contains_key(&job.id) {
            return Err(JobsmithError::validation(format!(
                "job {} already exists",
                job.id
            )));
        }
        if !matches!(job.status, JobStatus::Waiting | JobStatus::Delayed) {
            return Err(JobsmithError::validation(format!(
                "cannot enqueue a job in state {}",
                job.status
            )));
        }

        job.status = if job.run_at > now {
            JobStatus::Delayed
        } else {
            JobStatus::Waiting
        };
        job.sequence = storage.next_sequence;
        storage.next_sequence += 1;

        let job_id = job.id;
        storage.index(&job.queue_name).insert(&job);
        storage.jobs.insert(job_id, job);
        Ok(job_id)
    }

    async fn dequeue_next(&self, queue_name: &str) -> Result<Option<Job>> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        storage.promote_due(queue_name, now);

        let next = storage
            .queues
            .get(queue_name)
            .and_then(|index| index.waiting.iter().next().map(|(_, _, id)| *id));

        match next {
            Some(job_id) => {
                let job = storage.transition(job_id, |job| {
                    job.status = JobStatus::Active;
                    job.processing_started_at = Some(now);
                    job.finished_at = None;
                })?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn requeue_with_delay(
        &self,
        job_id: JobId,
        delay: Duration,
        error: &str,
    ) -> Result<Job> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        let job = storage.require_active(job_id, JobStatus::Delayed)?;
        if job.attempts_made + 1 >= job.max_attempts {
            return Err(JobsmithError::InvalidTransition {
                id: job_id.to_string(),
                from: "active (no attempts remaining)".to_string(),
                to: JobStatus::Delayed.to_string(),
            });
        }

        let job = storage.transition(job_id, |job| {
            job.attempts_made += 1;
            job.status = JobStatus::Delayed;
            job.run_at = add_delay(now, delay);
            job.processing_started_at = None;
            job.last_error = Some(error.to_string());
        })?;

        storage.settle_pending_removal(job_id);
        Ok(job)
    }

    async fn mark_completed(&self, job_id: JobId, result: serde_json::Value) -> Result<Job> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        storage.require_active(job_id, JobStatus::Completed)?;
        let job = storage.transition(job_id, |job| {
            job.attempts_made = (job.attempts_made + 1).min(job.max_attempts);
            job.status = JobStatus::Completed;
            job.finished_at = Some(now);
            job.result = Some(result);
        })?;

        storage.settle_pending_removal(job_id);
        storage.apply_retention(&job, now);
        Ok(job)
    }

    async fn mark_failed(&self, job_id: JobId, error: &str) -> Result<Job> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        storage.require_active(job_id, JobStatus::Failed)?;
        let job = storage.transition(job_id, |job| {
            job.attempts_made = (job.attempts_made + 1).min(job.max_attempts);
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            job.last_error = Some(error.to_string());
            job.result = None;
        })?;

        storage.settle_pending_removal(job_id);
        storage.apply_retention(&job, now);
        Ok(job)
    }

    async fn remove(&self, job_id: JobId) -> Result<Removal> {
        self.ensure_open()?;
        let mut storage = self.storage.write().await;

        let status = storage
            .jobs
            .get(&job_id)
            .map(|job| job.status)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if status == JobStatus::Active {
            storage.pending_removal.insert(job_id);
            Ok(Removal::Requested)
        } else {
            storage.delete(job_id);
            Ok(Removal::Removed)
        }
    }

    async fn get_by_id(&self, job_id: JobId) -> Result<Option<Job>> {
        self.ensure_open()?;
        let storage = self.storage.read().await;
        Ok(storage.jobs.get(&job_id).cloned())
    }

    async fn list_by_queue_and_status(
        &self,
        queue_name: &str,
        status: Option<JobStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Job>> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;
        storage.promote_due(queue_name, now);

        let Some(index) = storage.queues.get(queue_name) else {
            return Ok(Vec::new());
        };

        let ids = match status {
            Some(status) => index.ids(status),
            None => JobStatus::all()
                .into_iter()
                .flat_map(|status| index.ids(status))
                .collect(),
        };
        let mut jobs: Vec<&Job> = ids.iter().filter_map(|id| storage.jobs.get(id)).collect();

        jobs.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));

        Ok(jobs
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts_by_queue(&self, queue_name: &str) -> Result<JobCounts> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;
        storage.promote_due(queue_name, now);

        Ok(storage
            .queues
            .get(queue_name)
            .map(QueueIndex::counts)
            .unwrap_or_default())
    }

    async fn recover_stalled(
        &self,
        queue_name: &str,
        started_before: DateTime<Utc>,
        exclude: &[JobId],
    ) -> Result<Vec<JobId>> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        let stalled: Vec<JobId> = match storage.queues.get(queue_name) {
            Some(index) => index
                .active
                .iter()
                .filter(|id| !exclude.contains(id))
                .filter(|id| {
                    storage
                        .jobs
                        .get(id)
                        .and_then(|job| job.processing_started_at)
                        .is_some_and(|started| started < started_before)
                })
                .copied()
                .collect(),
            None => return Ok(Vec::new()),
        };

        for job_id in &stalled {
            let job = storage.transition(*job_id, |job| {
                job.attempts_made = (job.attempts_made + 1).min(job.max_attempts);
                job.last_error = Some("job stalled while active".to_string());
                if job.attempts_made >= job.max_attempts {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(now);
                    job.result = None;
                } else {
                    job.status = JobStatus::Waiting;
                    job.processing_started_at = None;
                    job.run_at = now;
                }
            })?;

            storage.settle_pending_removal(*job_id);
            if job.status == JobStatus::Failed {
                storage.apply_retention(&job, now);
            }
        }

        Ok(stalled)
    }

    async fn evict(&self, queue_name: &str) -> Result<usize> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        let mut evicted = 0;
        for status in [JobStatus::Completed, JobStatus::Failed] {
            let newest_policy = storage.queues.get(queue_name).and_then(|index| {
                index
                    .ids(status)
                    .iter()
                    .filter_map(|id| storage.jobs.get(id))
                    .max_by_key(|job| (job.finished_at, job.sequence))
                    .map(|job| job.retention.for_status(status))
            });

            if let Some(policy) = newest_policy {
                evicted += storage.sweep(queue_name, status, policy, now);
            }
        }
        Ok(evicted)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::job::Retention;
    use serde_json::json;

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new();
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn job(clock: &MockClock, priority: JobPriority) -> Job {
        let mut job = Job::new("test_queue", "work", json!({}), clock.now());
        job.priority = priority;
        job
    }

    #[tokio::test]
    async fn test_basic_enqueue_dequeue() {
        let (store, clock) = store();
        let job_id = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap();

        assert_eq!(store.counts_by_queue("test_queue").await.unwrap().waiting, 1);

        let dequeued = store.dequeue_next("test_queue").await.unwrap().unwrap();
        assert_eq!(dequeued.id, job_id);
        assert_eq!(dequeued.status, JobStatus::Active);
        assert_eq!(dequeued.processing_started_at, Some(clock.now()));

        let counts = store.counts_by_queue("test_queue").await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);

        assert!(store.dequeue_next("test_queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_promotion() {
        let (store, clock) = store();
        let delayed = job(&clock, JobPriority::Medium).with_delay(Duration::from_secs(3600));
        let job_id = store.enqueue(delayed).await.unwrap();

        assert_eq!(store.counts_by_queue("test_queue").await.unwrap().delayed, 1);
        assert!(store.dequeue_next("test_queue").await.unwrap().is_none());

        clock.advance(chrono::Duration::hours(1));

        let dequeued = store.dequeue_next("test_queue").await.unwrap().unwrap();
        assert_eq!(dequeued.id, job_id);
    }

    #[tokio::test]
    async fn test_requeue_with_delay() {
        let (store, clock) = store();
        let job_id = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        let requeued = store
            .requeue_with_delay(job_id, Duration::from_millis(2000), "temporary")
            .await
            .unwrap();
        assert_eq!(requeued.status, JobStatus::Delayed);
        assert_eq!(requeued.attempts_made, 1);
        assert_eq!(requeued.last_error.as_deref(), Some("temporary"));
        assert_eq!((requeued.run_at - clock.now()).num_milliseconds(), 2000);
        assert!(requeued.processing_started_at.is_none());

        clock.advance(chrono::Duration::milliseconds(1999));
        assert!(store.dequeue_next("test_queue").await.unwrap().is_none());

        clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(
            store.dequeue_next("test_queue").await.unwrap().unwrap().id,
            job_id
        );
    }

    #[tokio::test]
    async fn test_requeue_refused_without_attempts_remaining() {
        let (store, clock) = store();
        let mut single = job(&clock, JobPriority::Medium);
        single.max_attempts = 1;
        let job_id = store.enqueue(single).await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        let err = store
            .requeue_with_delay(job_id, Duration::ZERO, "boom")
            .await
            .unwrap_err();
        assert!(matches!(err, JobsmithError::InvalidTransition { .. }));

        let failed = store.mark_failed(job_id, "boom").await.unwrap();
        assert_eq!(failed.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_not_repeatable() {
        let (store, clock) = store();
        let job_id = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        let completed = store.mark_completed(job_id, json!({"ok": true})).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.result, Some(json!({"ok": true})));
        assert!(completed.finished_at.is_some());

        let again = store.mark_completed(job_id, json!(null)).await.unwrap_err();
        assert!(matches!(again, JobsmithError::InvalidTransition { .. }));
        let failed = store.mark_failed(job_id, "late").await.unwrap_err();
        assert!(matches!(failed, JobsmithError::InvalidTransition { .. }));

        // State untouched by the rejected calls
        let job = store.get_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts_made, 1);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn test_mark_on_unknown_job() {
        let (store, _clock) = store();
        let err = store
            .mark_completed(uuid::Uuid::new_v4(), json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, JobsmithError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_waiting_and_active() {
        let (store, clock) = store();
        let waiting_id = store.enqueue(job(&clock, JobPriority::Low)).await.unwrap();
        let active_id = store.enqueue(job(&clock, JobPriority::High)).await.unwrap();

        let claimed = store.dequeue_next("test_queue").await.unwrap().unwrap();
        assert_eq!(claimed.id, active_id);

        assert_eq!(store.remove(waiting_id).await.unwrap(), Removal::Removed);
        assert!(store.get_by_id(waiting_id).await.unwrap().is_none());

        assert_eq!(store.remove(active_id).await.unwrap(), Removal::Requested);
        assert!(store.get_by_id(active_id).await.unwrap().is_some());

        store.mark_completed(active_id, json!(null)).await.unwrap();
        assert!(store.get_by_id(active_id).await.unwrap().is_none());
        assert_eq!(store.counts_by_queue("test_queue").await.unwrap().total(), 0);

        let err = store.remove(waiting_id).await.unwrap_err();
        assert!(matches!(err, JobsmithError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_retention_keep_count_and_age() {
        let (store, clock) = store();
        let retention = Retention {
            on_complete: RetentionPolicy::keep(Some(3600), Some(2)),
            on_fail: RetentionPolicy::RemoveImmediately,
        };

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut job = job(&clock, JobPriority::Medium);
            job.retention = retention;
            ids.push(store.enqueue(job).await.unwrap());
        }
        for _ in 0..3 {
            let job = store.dequeue_next("test_queue").await.unwrap().unwrap();
            clock.advance(chrono::Duration::seconds(1));
            store.mark_completed(job.id, json!(null)).await.unwrap();
        }

        // Only the two newest completions survive
        assert_eq!(store.counts_by_queue("test_queue").await.unwrap().completed, 2);
        assert!(store.get_by_id(ids[0]).await.unwrap().is_none());

        // Age limit applies on the next sweep
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(store.evict("test_queue").await.unwrap(), 2);
        assert_eq!(store.counts_by_queue("test_queue").await.unwrap().completed, 0);
    }

    #[tokio::test]
    async fn test_retention_age_beyond_clock_range_keeps_records() {
        let (store, clock) = store();
        let mut ids = Vec::new();
        for max_age_secs in [u64::MAX, 100_000_000_000_000, i64::MAX as u64] {
            let mut job = job(&clock, JobPriority::Medium);
            job.retention.on_complete = RetentionPolicy::keep(Some(max_age_secs), None);
            job.retention.on_fail = RetentionPolicy::keep(Some(max_age_secs), None);
            job.max_attempts = 1;
            ids.push(store.enqueue(job).await.unwrap());
        }

        let first = store.dequeue_next("test_queue").await.unwrap().unwrap();
        store.mark_completed(first.id, json!(null)).await.unwrap();
        let second = store.dequeue_next("test_queue").await.unwrap().unwrap();
        store.mark_failed(second.id, "boom").await.unwrap();
        let third = store.dequeue_next("test_queue").await.unwrap().unwrap();
        store.mark_completed(third.id, json!(null)).await.unwrap();

        clock.advance(chrono::Duration::days(365));
        assert_eq!(store.evict("test_queue").await.unwrap(), 0);
        for id in ids {
            assert!(store.get_by_id(id).await.unwrap().is_some());
        }
    }

    #[test]
    fn test_retention_cutoff_limits() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 0), Some(now));
        assert_eq!(
            retention_cutoff(now, 3600),
            Some(now - chrono::Duration::hours(1))
        );
        assert_eq!(retention_cutoff(now, u64::MAX), None);
        assert_eq!(retention_cutoff(now, i64::MAX as u64), None);
        assert_eq!(retention_cutoff(now, 100_000_000_000_000), None);
    }

    #[tokio::test]
    async fn test_failed_removed_immediately() {
        let (store, clock) = store();
        let mut job = job(&clock, JobPriority::Medium);
        job.max_attempts = 1;
        job.retention.on_fail = RetentionPolicy::RemoveImmediately;
        let job_id = store.enqueue(job).await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        let failed = store.mark_failed(job_id, "boom").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(store.get_by_id(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_stalled() {
        let (store, clock) = store();
        let stalled_id = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap();
        let running_id = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();
        store.dequeue_next("test_queue").await.unwrap();

        clock.advance(chrono::Duration::minutes(10));
        let recovered = store
            .recover_stalled("test_queue", clock.now() - chrono::Duration::minutes(5), &[running_id])
            .await
            .unwrap();
        assert_eq!(recovered, vec![stalled_id]);

        let job = store.get_by_id(stalled_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts_made, 1);

        let running = store.get_by_id(running_id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_list_orders() {
        let (store, clock) = store();
        let high = store.enqueue(job(&clock, JobPriority::High)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let low = store.enqueue(job(&clock, JobPriority::Low)).await.unwrap();

        // Newest first even when priority would dequeue the older job first
        let waiting = store
            .list_by_queue_and_status("test_queue", Some(JobStatus::Waiting), 0, 10)
            .await
            .unwrap();
        assert_eq!(
            waiting.iter().map(|job| job.id).collect::<Vec<_>>(),
            vec![low, high]
        );

        // Unfiltered listing is newest first
        let all = store
            .list_by_queue_and_status("test_queue", None, 0, 10)
            .await
            .unwrap();
        assert_eq!(all.iter().map(|job| job.id).collect::<Vec<_>>(), vec![low, high]);

        let page = store
            .list_by_queue_and_status("test_queue", Some(JobStatus::Waiting), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, high);

        assert!(
            store
                .list_by_queue_and_status("unknown", None, 0, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let (store, clock) = store();
        store.close().await.unwrap();

        let err = store.enqueue(job(&clock, JobPriority::Medium)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.dequeue_next("test_queue").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicates_and_finished_jobs() {
        let (store, clock) = store();
        let job = job(&clock, JobPriority::Medium);
        store.enqueue(job.clone()).await.unwrap();
        assert!(matches!(
            store.enqueue(job).await.unwrap_err(),
            JobsmithError::Validation { .. }
        ));

        let mut finished = self::job(&clock, JobPriority::Medium);
        finished.status = JobStatus::Completed;
        assert!(matches!(
            store.enqueue(finished).await.unwrap_err(),
            JobsmithError::Validation { .. }
        ));
    }
}
