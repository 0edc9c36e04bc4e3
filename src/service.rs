//! Operations offered to outer layers (HTTP handlers, dashboards, CLIs).
//!
//! [`JobService`] resolves jobs across every registered queue, renders them as
//! [`JobView`]s and maps failures onto the error taxonomy: unknown jobs and
//! queues are [`JobsmithError::JobNotFound`] / [`JobsmithError::QueueNotFound`],
//! malformed requests are [`JobsmithError::Validation`], and store outages pass
//! through as [`JobsmithError::StoreUnavailable`].

use crate::{
    JobsmithError, Result,
    clock::{Clock, SystemClock},
    job::{Job, JobId, JobOptions, JobStatus, JobView},
    queue::Queue,
    registry::QueueRegistry,
    stats::{StatsAggregator, StatsSnapshot},
    store::Removal,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Reply to an accepted enqueue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub queue: String,
    pub status: String,
}

/// Filter and page selection for [`JobService::list_jobs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Restrict to one queue; all queues when absent
    pub queue: Option<String>,
    pub status: Option<JobStatus>,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            queue: None,
            status: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }

    fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(JobsmithError::validation("page must be at least 1"));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(JobsmithError::validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    /// Number of jobs matching the filter across all pages
    pub total_jobs: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<JobView>,
    pub pagination: Pagination,
}

/// One line of a job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Cross-queue job operations.
#[derive(Debug, Clone)]
pub struct JobService {
    registry: Arc<QueueRegistry>,
    clock: Arc<dyn Clock>,
}

impl JobService {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self {
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// Submit a job from a raw request: `options` is validated before
    /// anything reaches the store.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        type_name: &str,
        payload: serde_json::Value,
        options: Option<serde_json::Value>,
    ) -> Result<EnqueueReceipt> {
        let queue = self.registry.require(queue_name).await?;
        let options = match options {
            Some(value) => JobOptions::from_json(value)?,
            None => JobOptions::new(),
        };

        let job = queue.enqueue(type_name, payload, options).await?;
        Ok(EnqueueReceipt {
            job_id: job.id.to_string(),
            queue: job.queue_name,
            status: "created".to_string(),
        })
    }

    /// Look up a job by plain id or by `queue:id`.
    pub async fn get_job(&self, id: &str) -> Result<JobView> {
        let (_, job) = self.find(id).await?;
        Ok(JobView::from_job(&job, self.clock.now()))
    }

    /// Remove a job. Active jobs are removed once their execution ends.
    pub async fn cancel_job(&self, id: &str) -> Result<Removal> {
        let (queue, job) = self.find(id).await?;
        let removal = queue.store().remove(job.id).await?;
        info!(job_id = %job.id, queue = %queue.name(), ?removal, "Job cancelled");
        Ok(removal)
    }

    /// Page through jobs of one queue or of all queues (newest first).
    ///
    /// `total_jobs` counts every matching job, not just the returned page.
    pub async fn list_jobs(&self, query: &ListQuery) -> Result<JobPage> {
        query.validate()?;
        let offset = query.offset();

        let (jobs, total_jobs) = match &query.queue {
            Some(name) => {
                let queue = self.registry.require(name).await?;
                let total = Self::count(&queue, query.status).await?;
                let jobs = queue
                    .store()
                    .list_by_queue_and_status(queue.name(), query.status, offset, query.limit)
                    .await?;
                (jobs, total)
            }
            None => {
                let mut merged = Vec::new();
                let mut total = 0;
                // Stores list newest first, so each queue's first `window` jobs
                // hold every one of its jobs that could land on this page
                let window = offset.saturating_add(query.limit);
                for queue in self.registry.get_all().await {
                    total += Self::count(&queue, query.status).await?;
                    merged.extend(
                        queue
                            .store()
                            .list_by_queue_and_status(queue.name(), query.status, 0, window)
                            .await?,
                    );
                }
                merged.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));
                let page = merged.into_iter().skip(offset).take(query.limit).collect();
                (page, total)
            }
        };

        let now = self.clock.now();
        let has_more = (offset + jobs.len()) < total_jobs as usize;
        Ok(JobPage {
            jobs: jobs.iter().map(|job| JobView::from_job(job, now)).collect(),
            pagination: Pagination {
                page: query.page,
                limit: query.limit,
                total_jobs,
                has_more,
            },
        })
    }

    /// Attempt history reconstructed from the job record.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<JobLogEntry>> {
        let (_, job) = self.find(id).await?;
        Ok(history(&job, self.clock.now()))
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        StatsAggregator::new(Arc::clone(&self.registry))
            .with_clock(Arc::clone(&self.clock))
            .get_stats()
            .await
    }

    async fn count(queue: &Queue, status: Option<JobStatus>) -> Result<u64> {
        let counts = queue.store().counts_by_queue(queue.name()).await?;
        Ok(match status {
            Some(status) => counts.get(status),
            None => counts.total(),
        })
    }

    async fn find(&self, id: &str) -> Result<(Arc<Queue>, Job)> {
        let not_found = || JobsmithError::JobNotFound { id: id.to_string() };

        if let Some((queue_name, raw_id)) = id.split_once(':') {
            let queue = self.registry.require(queue_name).await?;
            let job_id = parse_id(raw_id).ok_or_else(not_found)?;
            return match queue.store().get_by_id(job_id).await? {
                Some(job) if job.queue_name == queue.name() => Ok((queue, job)),
                _ => Err(not_found()),
            };
        }

        let job_id = parse_id(id).ok_or_else(not_found)?;
        for queue in self.registry.get_all().await {
            if let Some(job) = queue.store().get_by_id(job_id).await? {
                if job.queue_name == queue.name() {
                    return Ok((queue, job));
                }
            }
        }
        Err(not_found())
    }
}

fn parse_id(raw: &str) -> Option<JobId> {
    Uuid::parse_str(raw.trim()).ok()
}

fn history(job: &Job, now: DateTime<Utc>) -> Vec<JobLogEntry> {
    let entry = |timestamp, message: String| JobLogEntry { timestamp, message };
    let mut log = vec![entry(
        job.created_at,
        format!("Job '{}' created in queue '{}'", job.type_name, job.queue_name),
    )];

    if job.attempts_made > 0 {
        let failed_attempts = if job.status == JobStatus::Completed {
            job.attempts_made - 1
        } else {
            job.attempts_made
        };
        if failed_attempts > 0 {
            let reason = job.last_error.as_deref().unwrap_or("unknown error");
            log.push(entry(
                job.finished_at.or(job.processing_started_at).unwrap_or(now),
                format!(
                    "{} of {} attempts failed, last error: {}",
                    failed_attempts, job.max_attempts, reason
                ),
            ));
        }
    }

    match job.status {
        JobStatus::Waiting => log.push(entry(now, "Waiting to be processed".to_string())),
        JobStatus::Delayed => log.push(entry(
            job.run_at,
            format!("Scheduled to run at {}", job.run_at.to_rfc3339()),
        )),
        JobStatus::Active => {
            let started = job.processing_started_at.unwrap_or(now);
            log.push(entry(
                started,
                format!("Attempt {} of {} started", job.attempts_made + 1, job.max_attempts),
            ));
        }
        JobStatus::Completed => log.push(entry(
            job.finished_at.unwrap_or(now),
            format!("Completed after {} attempt(s)", job.attempts_made),
        )),
        JobStatus::Failed => log.push(entry(
            job.finished_at.unwrap_or(now),
            format!("Failed permanently after {} attempt(s)", job.attempts_made),
        )),
    }
    log
}
