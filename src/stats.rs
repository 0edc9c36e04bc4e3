//! Queue statistics.
//!
//! Two views are offered. [`StatsAggregator`] reads lifecycle counts from the
//! store for every registered queue. [`InMemoryStatsCollector`] records the
//! [`JobEvent`]s worker pools emit and answers time-windowed questions about
//! throughput, retries and processing time.

use crate::{
    Result,
    clock::{Clock, SystemClock},
    job::JobId,
    priority::JobPriority,
    registry::QueueRegistry,
    store::JobCounts,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::Duration,
};

/// Point-in-time counts for every registered queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub per_queue: BTreeMap<String, JobCounts>,
    /// Sum of every state across every queue
    pub total_jobs: u64,
    pub timestamp: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn queue(&self, name: &str) -> Option<&JobCounts> {
        self.per_queue.get(name)
    }

    /// Counts summed over all queues
    pub fn totals(&self) -> JobCounts {
        self.per_queue
            .values()
            .fold(JobCounts::default(), |acc, counts| acc + *counts)
    }
}

/// Reads per-queue counts from the store. Never mutates job state.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    registry: Arc<QueueRegistry>,
    clock: Arc<dyn Clock>,
}

impl StatsAggregator {
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

    /// Snapshot of all registered queues. An empty registry yields an empty
    /// snapshot.
    pub async fn get_stats(&self) -> Result<StatsSnapshot> {
        let mut per_queue = BTreeMap::new();

        for queue in self.registry.get_all().await {
            let counts = queue.store().counts_by_queue(queue.name()).await?;
            per_queue.insert(queue.name().to_string(), counts);
        }

        let total_jobs = per_queue.values().map(JobCounts::total).sum();
        Ok(StatsSnapshot {
            per_queue,
            total_jobs,
            timestamp: self.clock.now(),
        })
    }
}

/// Job processing event for statistics collection
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue_name: String,
    pub event_type: JobEventType,
    pub priority: JobPriority,
    /// Attempt number this event belongs to, starting at 1
    pub attempt: u32,
    pub processing_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventType {
    Started,
    Completed,
    /// The attempt failed and the job runs again after `delay`
    Retried { delay: Duration },
    /// The job failed for good
    Failed,
    /// The attempt exceeded its deadline; followed by `Retried` or `Failed`
    TimedOut,
}

/// Statistics for job processing over a time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Number of executions started in the window
    pub started: u64,
    /// Number of successfully completed jobs
    pub completed: u64,
    /// Number of terminally failed jobs
    pub failed: u64,
    /// Number of attempts scheduled for retry
    pub retried: u64,
    /// Number of attempts that hit their deadline
    pub timed_out: u64,
    pub avg_processing_time_ms: f64,
    pub min_processing_time_ms: u64,
    pub max_processing_time_ms: u64,
    /// Completed plus failed jobs per minute
    pub throughput_per_minute: f64,
    /// Share of finished jobs that failed
    pub error_rate: f64,
    pub time_window: Duration,
    pub calculated_at: DateTime<Utc>,
}

impl JobStatistics {
    fn empty(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            started: 0,
            completed: 0,
            failed: 0,
            retried: 0,
            timed_out: 0,
            avg_processing_time_ms: 0.0,
            min_processing_time_ms: 0,
            max_processing_time_ms: 0,
            throughput_per_minute: 0.0,
            error_rate: 0.0,
            time_window: window,
            calculated_at: now,
        }
    }
}

/// Trait for collecting and storing job statistics
#[async_trait::async_trait]
pub trait StatisticsCollector: Send + Sync {
    /// Record a job processing event
    async fn record_event(&self, event: JobEvent) -> Result<()>;

    /// Get statistics for a specific queue over a time window
    async fn get_queue_statistics(&self, queue_name: &str, window: Duration)
    -> Result<JobStatistics>;

    /// Get statistics for all queues combined
    async fn get_system_statistics(&self, window: Duration) -> Result<JobStatistics>;

    /// Drop events older than the given age
    async fn cleanup_old_statistics(&self, older_than: Duration) -> Result<u64>;
}

/// Configuration for statistics collection
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Maximum number of events to keep in memory
    pub max_events: usize,
    /// Maximum age of events to keep (in seconds)
    pub max_event_age_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            max_event_age_secs: 3600,
        }
    }
}

/// In-memory statistics collector with time-windowed data
pub struct InMemoryStatsCollector {
    events: Arc<RwLock<Vec<JobEvent>>>,
    config: StatsConfig,
    clock: Arc<dyn Clock>,
}

impl InMemoryStatsCollector {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new_default() -> Self {
        Self::new(StatsConfig::default())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<JobEvent> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Recorded events of one job, oldest first.
    pub fn events_for_job(&self, job_id: JobId) -> Vec<JobEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.job_id == job_id)
            .collect()
    }

    /// Retry delays scheduled for one job, in order.
    pub fn retry_delays(&self, job_id: JobId) -> Vec<Duration> {
        self.events_for_job(job_id)
            .into_iter()
            .filter_map(|event| match event.event_type {
                JobEventType::Retried { delay } => Some(delay),
                _ => None,
            })
            .collect()
    }

    fn cutoff(&self, age: Duration) -> DateTime<Utc> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn filter_events_by_window(&self, window: Duration) -> Vec<JobEvent> {
        let cutoff = self.cutoff(window);
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn calculate_statistics(&self, events: &[JobEvent], window: Duration) -> JobStatistics {
        let now = self.clock.now();
        if events.is_empty() {
            return JobStatistics::empty(window, now);
        }

        let count = |wanted: fn(&JobEventType) -> bool| {
            events.iter().filter(|e| wanted(&e.event_type)).count() as u64
        };
        let started = count(|t| matches!(t, JobEventType::Started));
        let completed = count(|t| matches!(t, JobEventType::Completed));
        let failed = count(|t| matches!(t, JobEventType::Failed));
        let retried = count(|t| matches!(t, JobEventType::Retried { .. }));
        let timed_out = count(|t| matches!(t, JobEventType::TimedOut));

        let processing_times: Vec<u64> = events
            .iter()
            .filter(|e| e.event_type == JobEventType::Completed)
            .filter_map(|e| e.processing_time_ms)
            .collect();

        let (avg_processing_time_ms, min_processing_time_ms, max_processing_time_ms) =
            match (processing_times.iter().min(), processing_times.iter().max()) {
                (Some(min), Some(max)) => {
                    let sum: u64 = processing_times.iter().sum();
                    (sum as f64 / processing_times.len() as f64, *min, *max)
                }
                _ => (0.0, 0, 0),
            };

        let finished = completed + failed;
        let error_rate = if finished > 0 {
            failed as f64 / finished as f64
        } else {
            0.0
        };

        let throughput_per_minute = if window.as_secs() > 0 {
            finished as f64 * 60.0 / window.as_secs() as f64
        } else {
            0.0
        };

        JobStatistics {
            started,
            completed,
            failed,
            retried,
            timed_out,
            avg_processing_time_ms,
            min_processing_time_ms,
            max_processing_time_ms,
            throughput_per_minute,
            error_rate,
            time_window: window,
            calculated_at: now,
        }
    }

    /// Drop events older than `max_event_age_secs` and trim to `max_events`
    pub fn cleanup_old_events(&self) -> usize {
        let cutoff = self.cutoff(Duration::from_secs(self.config.max_event_age_secs));
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let original_len = events.len();
        events.retain(|event| event.timestamp >= cutoff);

        if events.len() > self.config.max_events {
            let excess = events.len() - self.config.max_events;
            events.drain(0..excess);
        }
        original_len - events.len()
    }
}

impl Default for InMemoryStatsCollector {
    fn default() -> Self {
        Self::new_default()
    }
}

#[async_trait::async_trait]
impl StatisticsCollector for InMemoryStatsCollector {
    async fn record_event(&self, event: JobEvent) -> Result<()> {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(event);

        if events.len() > self.config.max_events {
            let excess = events.len() - self.config.max_events;
            events.drain(0..excess);
        }

        Ok(())
    }

    async fn get_queue_statistics(
        &self,
        queue_name: &str,
        window: Duration,
    ) -> Result<JobStatistics> {
        let queue_events: Vec<JobEvent> = self
            .filter_events_by_window(window)
            .into_iter()
            .filter(|e| e.queue_name == queue_name)
            .collect();

        Ok(self.calculate_statistics(&queue_events, window))
    }

    async fn get_system_statistics(&self, window: Duration) -> Result<JobStatistics> {
        let events = self.filter_events_by_window(window);
        Ok(self.calculate_statistics(&events, window))
    }

    async fn cleanup_old_statistics(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self.cutoff(older_than);
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let original_len = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        Ok((original_len - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::MockClock,
        job::JobOptions,
        queue::Queue,
        store::{JobStore, MemoryStore},
    };
    use serde_json::json;

    fn event(
        clock: &MockClock,
        queue_name: &str,
        event_type: JobEventType,
        processing_time_ms: Option<u64>,
    ) -> JobEvent {
        JobEvent {
            job_id: uuid::Uuid::new_v4(),
            queue_name: queue_name.to_string(),
            event_type,
            priority: JobPriority::Medium,
            attempt: 1,
            processing_time_ms,
            error_message: None,
            timestamp: clock.now(),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_snapshot() {
        let aggregator = StatsAggregator::new(Arc::new(QueueRegistry::new()));
        let snapshot = aggregator.get_stats().await.unwrap();
        assert!(snapshot.per_queue.is_empty());
        assert_eq!(snapshot.total_jobs, 0);
    }

    #[tokio::test]
    async fn test_snapshot_counts_per_queue() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(QueueRegistry::new());
        let email = Arc::new(Queue::new("email", store.clone()));
        let idle = Arc::new(Queue::new("notification", store.clone()));
        registry.register(email.clone()).await;
        registry.register(idle).await;

        email.enqueue("send-email", json!({}), JobOptions::new()).await.unwrap();
        email.enqueue("send-email", json!({}), JobOptions::new()).await.unwrap();
        let claimed = store.dequeue_next("email").await.unwrap().unwrap();
        store.mark_completed(claimed.id, json!(null)).await.unwrap();

        let snapshot = StatsAggregator::new(registry).get_stats().await.unwrap();
        let counts = snapshot.queue("email").unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(snapshot.queue("notification"), Some(&JobCounts::default()));
        assert_eq!(snapshot.total_jobs, 2);
        assert_eq!(snapshot.totals().total(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_stats_collector() {
        let clock = MockClock::new();
        let collector = InMemoryStatsCollector::new_default().with_clock(Arc::new(clock.clone()));

        collector
            .record_event(event(&clock, "email", JobEventType::Started, None))
            .await
            .unwrap();
        collector
            .record_event(event(&clock, "email", JobEventType::Completed, Some(1000)))
            .await
            .unwrap();
        collector
            .record_event(event(
                &clock,
                "email",
                JobEventType::Retried {
                    delay: Duration::from_secs(1),
                },
                None,
            ))
            .await
            .unwrap();
        collector
            .record_event(event(&clock, "processing", JobEventType::Failed, None))
            .await
            .unwrap();

        let stats = collector
            .get_queue_statistics("email", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.avg_processing_time_ms, 1000.0);
        assert_eq!(stats.error_rate, 0.0);

        let system = collector
            .get_system_statistics(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(system.failed, 1);
        assert_eq!(system.error_rate, 0.5);
        assert_eq!(system.throughput_per_minute, 2.0);
    }

    #[tokio::test]
    async fn test_window_and_cleanup() {
        let clock = MockClock::new();
        let collector = InMemoryStatsCollector::new_default().with_clock(Arc::new(clock.clone()));

        collector
            .record_event(event(&clock, "email", JobEventType::Completed, Some(10)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        collector
            .record_event(event(&clock, "email", JobEventType::Completed, Some(30)))
            .await
            .unwrap();

        let recent = collector
            .get_queue_statistics("email", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(recent.completed, 1);
        assert_eq!(recent.max_processing_time_ms, 30);

        let removed = collector
            .cleanup_old_statistics(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(collector.events().len(), 1);
    }

    #[test]
    fn test_event_cap() {
        let clock = MockClock::new();
        let collector = InMemoryStatsCollector::new(StatsConfig {
            max_events: 2,
            max_event_age_secs: 3600,
        })
        .with_clock(Arc::new(clock.clone()));

        for _ in 0..3 {
            collector
                .events
                .write()
                .unwrap()
                .push(event(&clock, "email", JobEventType::Started, None));
        }
        assert_eq!(collector.cleanup_old_events(), 1);
        assert_eq!(collector.events().len(), 2);
    }

    #[test]
    fn test_retry_delays_for_job() {
        let clock = MockClock::new();
        let collector = InMemoryStatsCollector::new_default();
        let mut first = event(
            &clock,
            "email",
            JobEventType::Retried {
                delay: Duration::from_millis(1000),
            },
            None,
        );
        let job_id = first.job_id;
        let mut second = first.clone();
        second.event_type = JobEventType::Retried {
            delay: Duration::from_millis(2000),
        };
        first.attempt = 1;
        second.attempt = 2;

        {
            let mut events = collector.events.write().unwrap();
            events.push(first);
            events.push(second);
        }

        assert_eq!(
            collector.retry_delays(job_id),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }
}
