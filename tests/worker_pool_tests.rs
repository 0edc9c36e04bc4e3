
use jobsmith::{
    BackoffPolicy, InMemoryStatsCollector, Job, JobEventType, JobOptions, JobStatus,
    JobsmithError, Queue, QueueRegistry, RateLimit, StatisticsCollector, StatsAggregator,
    TokioClock, WorkerConfig, WorkerPool,
    executor::{ProcessorRegistry, handler},
    store::{JobStore, MemoryStore},
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use test_utils::{FlakyStore, tokio_queue, wait_for_status};
use tokio::time::sleep;

fn collector() -> Arc<InMemoryStatsCollector> {
    Arc::new(InMemoryStatsCollector::new_default().with_clock(Arc::new(TokioClock::new())))
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_exponential_backoff_then_success() {
    let (queue, store) = tokio_queue("email");
    let stats = collector();
    let attempts: Arc<Mutex<HashMap<String, u32>>> = Arc::default();

    let seen = attempts.clone();
    let registry = ProcessorRegistry::single(handler(move |job: Job| {
        let seen = seen.clone();
        async move {
            let attempt = {
                let mut seen = seen.lock().unwrap();
                let count = seen.entry(job.id.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            if attempt < 3 {
                return Err(JobsmithError::handler(format!("attempt {} failed", attempt)));
            }
            Ok(json!({ "attempt": attempt }))
        }
    }));

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new().with_concurrency(2))
        .with_stats_collector(stats.clone());
    pool.start().unwrap();

    let job = queue
        .enqueue(
            "welcome-email",
            json!({ "to": "ada@example.com" }),
            JobOptions::new()
                .with_max_attempts(3)
                .with_backoff(BackoffPolicy::exponential(1000)),
        )
        .await
        .unwrap();

    let done = wait_for_status(&store, job.id, JobStatus::Completed).await;
    assert_eq!(done.attempts_made, 3);
    assert_eq!(done.result, Some(json!({ "attempt": 3 })));
    assert_eq!(
        stats.retry_delays(job.id),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );

    let finished_after = done.finished_at.unwrap() - done.created_at;
    assert!(finished_after >= chrono::Duration::milliseconds(3000));

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_job_fails_without_retry() {
    let (queue, store) = tokio_queue("notification");
    let stats = collector();
    let registry = ProcessorRegistry::single(handler(|_job| async {
        Err(JobsmithError::handler("push provider rejected token"))
    }));

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new())
        .with_stats_collector(stats.clone());
    pool.start().unwrap();

    let job = queue
        .enqueue("push-notification", json!({}), JobOptions::new().with_max_attempts(1))
        .await
        .unwrap();

    let failed = wait_for_status(&store, job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempts_made, 1);
    assert!(failed.last_error.unwrap().contains("push provider rejected token"));
    assert!(stats.retry_delays(job.id).is_empty());

    let events = stats.events_for_job(job.id);
    assert!(matches!(events.last().unwrap().event_type, JobEventType::Failed));

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_one_runs_jobs_one_at_a_time() {
    let (queue, store) = tokio_queue("processing");
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (r, p) = (running.clone(), peak.clone());
    let registry = ProcessorRegistry::single(handler(move |_job| {
        let (running, peak) = (r.clone(), p.clone());
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(100)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(null))
        }
    }));

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new().with_concurrency(1));
    pool.start().unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
        let job = queue
            .enqueue("process-data", json!({ "n": i }), JobOptions::new())
            .await
            .unwrap();
        ids.push(job.id);
    }

    for id in &ids {
        wait_for_status(&store, *id, JobStatus::Completed).await;
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    pool.stop().await.unwrap();

    let registry = Arc::new(QueueRegistry::new());
    registry.register(queue).await;
    let snapshot = StatsAggregator::new(registry).get_stats().await.unwrap();
    let counts = snapshot.queue("processing").unwrap();
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 0);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.delayed, 0);
    assert_eq!(snapshot.total_jobs, 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_out_starts() {
    let (queue, store) = tokio_queue("email");
    let stats = collector();

    let mut ids = Vec::new();
    for i in 0..12 {
        let job = queue
            .enqueue("send-email", json!({ "n": i }), JobOptions::new())
            .await
            .unwrap();
        ids.push(job.id);
    }

    let registry = ProcessorRegistry::single(handler(|_job| async { Ok(json!(null)) }));
    let mut pool = WorkerPool::new(
        queue.clone(),
        registry,
        WorkerConfig::new()
            .with_concurrency(10)
            .with_rate_limit(RateLimit::new(5, Duration::from_millis(1000))),
    )
    .with_stats_collector(stats.clone());
    pool.start().unwrap();

    for id in &ids {
        wait_for_status(&store, *id, JobStatus::Completed).await;
    }
    pool.stop().await.unwrap();

    let mut starts: Vec<_> = stats
        .events()
        .into_iter()
        .filter(|event| matches!(event.event_type, JobEventType::Started))
        .map(|event| event.timestamp)
        .collect();
    starts.sort();
    assert_eq!(starts.len(), 12);

    // No six starts ever fit inside one window
    for pair in starts.windows(6) {
        assert!(pair[5] - pair[0] >= chrono::Duration::milliseconds(1000));
    }
}

#[tokio::test(start_paused = true)]
async fn test_pool_waits_out_store_outage() {
    let clock = Arc::new(TokioClock::new());
    let store = FlakyStore::new(MemoryStore::with_clock(clock.clone()));
    let queue = Arc::new(Queue::new("email", Arc::new(store.clone())).with_clock(clock));

    let job = queue
        .enqueue("send-email", json!({}), JobOptions::new())
        .await
        .unwrap();
    store.set_available(false);

    let registry = ProcessorRegistry::single(handler(|_job| async { Ok(json!("sent")) }));
    let mut pool = WorkerPool::new(
        queue.clone(),
        registry,
        WorkerConfig::new()
            .with_store_retry_delay(Duration::from_millis(100), Duration::from_secs(1)),
    );
    pool.start().unwrap();

    sleep(Duration::from_secs(5)).await;
    let untouched = store.inner().get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, JobStatus::Waiting);

    store.set_available(true);
    let done = wait_for_status(store.inner(), job.id, JobStatus::Completed).await;
    assert_eq!(done.attempts_made, 1);

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_outcome_recorded_after_store_recovers() {
    let clock = Arc::new(TokioClock::new());
    let store = Arc::new(FlakyStore::new(MemoryStore::with_clock(clock.clone())));
    let queue = Arc::new(Queue::new("email", store.clone()).with_clock(clock));
    let stats = collector();

    let flaky = store.clone();
    let registry = ProcessorRegistry::single(handler(move |_job| {
        let store = flaky.clone();
        async move {
            // The connection drops while the job runs and returns a second later
            store.set_available(false);
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                store.set_available(true);
            });
            Ok(json!("delivered"))
        }
    }));

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new())
        .with_stats_collector(stats.clone());
    pool.start().unwrap();

    let job = queue
        .enqueue("send-email", json!({}), JobOptions::new())
        .await
        .unwrap();

    let done = wait_for_status(store.inner(), job.id, JobStatus::Completed).await;
    assert_eq!(done.attempts_made, 1);
    assert_eq!(done.result, Some(json!("delivered")));

    let started = stats
        .events_for_job(job.id)
        .into_iter()
        .filter(|event| matches!(event.event_type, JobEventType::Started))
        .count();
    assert_eq!(started, 1);

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_handlers_dispatch_by_type() {
    let (queue, store) = tokio_queue("notification");
    let registry = ProcessorRegistry::builder(handler(|job: Job| async move {
        Ok(json!({ "handled_by": "default", "type": job.type_name }))
    }))
    .register(
        "sms-notification",
        handler(|_job| async { Ok(json!({ "handled_by": "sms" })) }),
    )
    .unwrap()
    .build();

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new().with_concurrency(2));
    pool.start().unwrap();

    let sms = queue.enqueue("sms-notification", json!({}), JobOptions::new()).await.unwrap();
    let other = queue.enqueue("in-app-notification", json!({}), JobOptions::new()).await.unwrap();

    let sms = wait_for_status(&store, sms.id, JobStatus::Completed).await;
    let other = wait_for_status(&store, other.id, JobStatus::Completed).await;
    assert_eq!(sms.result, Some(json!({ "handled_by": "sms" })));
    assert_eq!(
        other.result,
        Some(json!({ "handled_by": "default", "type": "in-app-notification" }))
    );

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_statistics_collected_from_pool() {
    let (queue, store) = tokio_queue("email");
    let stats = collector();
    let registry = ProcessorRegistry::single(handler(|job: Job| async move {
        sleep(Duration::from_millis(200)).await;
        if job.payload["fail"].as_bool().unwrap_or(false) {
            return Err(JobsmithError::handler("mailbox full"));
        }
        Ok(json!(null))
    }));

    let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new().with_concurrency(2))
        .with_stats_collector(stats.clone());
    pool.start().unwrap();

    let ok = queue.enqueue("send-email", json!({}), JobOptions::new()).await.unwrap();
    let bad = queue
        .enqueue("send-email", json!({ "fail": true }), JobOptions::new().with_max_attempts(1))
        .await
        .unwrap();
    wait_for_status(&store, ok.id, JobStatus::Completed).await;
    wait_for_status(&store, bad.id, JobStatus::Failed).await;
    pool.stop().await.unwrap();

    let summary = stats
        .get_queue_statistics("email", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(summary.started, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 0);
    assert!((summary.error_rate - 0.5).abs() < f64::EPSILON);
    assert!(summary.min_processing_time_ms >= 200);
}
