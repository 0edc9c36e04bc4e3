//! Durable queue store contract and the in-memory reference store.
//!
//! The [`JobStore`] trait is the only place job state changes. Every method is
//! atomic with respect to the others, so concurrent workers can call
//! [`JobStore::dequeue_next`] without ever receiving the same job twice.
//! A persistent backend implements the same trait; [`memory::MemoryStore`]
//! keeps everything in process.

use crate::{
    Result,
    job::{Job, JobId, JobStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod memory;

pub use memory::MemoryStore;

/// Number of jobs per lifecycle state for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Waiting => self.waiting,
            JobStatus::Active => self.active,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Delayed => self.delayed,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

impl std::ops::Add for JobCounts {
    type Output = JobCounts;

    fn add(self, other: JobCounts) -> JobCounts {
        JobCounts {
            waiting: self.waiting + other.waiting,
            active: self.active + other.active,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            delayed: self.delayed + other.delayed,
        }
    }
}

/// Result of a removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Removal {
    /// The record is gone.
    Removed,
    /// The job is executing; its record is dropped once the execution reports
    /// an outcome. The running handler is not interrupted.
    Requested,
}

/// Storage operations for the job queue.
///
/// Implementations must fail every operation with
/// [`JobsmithError::StoreUnavailable`](crate::JobsmithError::StoreUnavailable)
/// when the backing store cannot be reached. Callers retry those; they never
/// drop the job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Jobs whose `run_at` lies in the future are stored as
    /// `delayed`, everything else as `waiting`.
    async fn enqueue(&self, job: Job) -> Result<JobId>;

    /// Atomically claim the next eligible job of a queue and mark it `active`.
    ///
    /// Selection is by ascending priority value, then enqueue order. Delayed
    /// jobs whose `run_at` has passed are promoted to `waiting` first.
    async fn dequeue_next(&self, queue_name: &str) -> Result<Option<Job>>;

    /// Record a failed attempt and schedule the job to run again after
    /// `delay`. Only valid for `active` jobs with attempts remaining.
    async fn requeue_with_delay(&self, job_id: JobId, delay: Duration, error: &str)
    -> Result<Job>;

    /// Record a successful attempt. Only valid for `active` jobs.
    async fn mark_completed(&self, job_id: JobId, result: serde_json::Value) -> Result<Job>;

    /// Record a final failed attempt. Only valid for `active` jobs.
    async fn mark_failed(&self, job_id: JobId, error: &str) -> Result<Job>;

    /// Remove a job. Active jobs are flagged and removed when their execution
    /// finishes.
    async fn remove(&self, job_id: JobId) -> Result<Removal>;

    async fn get_by_id(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Page through a queue's jobs, optionally restricted to one state.
    ///
    /// Jobs come back newest first (by creation, then enqueue order) whatever
    /// the state filter, so pages from several queues merge on the same key.
    async fn list_by_queue_and_status(
        &self,
        queue_name: &str,
        status: Option<JobStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Job>>;

    async fn counts_by_queue(&self, queue_name: &str) -> Result<JobCounts>;

    /// Return `active` jobs whose execution started before `started_before`
    /// to `waiting` (or `failed` when no attempts remain). Jobs listed in
    /// `exclude` are known to be running and are left alone.
    async fn recover_stalled(
        &self,
        queue_name: &str,
        started_before: DateTime<Utc>,
        exclude: &[JobId],
    ) -> Result<Vec<JobId>>;

    /// Apply retention to the queue's terminal jobs. Returns how many
    /// records were evicted.
    async fn evict(&self, queue_name: &str) -> Result<usize>;

    /// Release the store's connection. Later calls fail as unavailable.
    async fn close(&self) -> Result<()>;
}
