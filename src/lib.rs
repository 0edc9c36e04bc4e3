//! # Jobsmith
//!
//! An in-process background job processor for Rust: named queues, priority
//! ordering, delayed jobs, automatic retries with backoff, per-queue worker
//! pools with rate limits, and retention of finished jobs.
//!
//! ## Features
//!
//! - **Named queues**: each queue carries its own job defaults
//! - **Priorities**: High, Medium and Low, FIFO within a priority
//! - **Delayed jobs**: schedule work to become eligible later
//! - **Retries**: fixed or exponential backoff up to a per-job attempt limit
//! - **Timeouts**: per-job or per-pool deadlines
//! - **Worker pools**: bounded concurrency and a sliding-window rate limit
//! - **Retention**: keep, drop or age out completed and failed jobs
//! - **Statistics**: per-queue counts and processing event statistics
//! - **Async/await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobsmith::{
//!     JobOptions, JobPriority, Queue, WorkerConfig, WorkerPool,
//!     executor::{ProcessorRegistry, handler},
//!     store::MemoryStore,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> jobsmith::Result<()> {
//!     let queue = Arc::new(Queue::new("email", Arc::new(MemoryStore::new())));
//!
//!     let registry = ProcessorRegistry::builder(handler(|_job| async move {
//!         Ok(json!({ "sent": true }))
//!     }))
//!     .register(
//!         "welcome-email",
//!         handler(|job| async move {
//!             println!("Welcoming {}", job.payload["to"]);
//!             Ok(json!({ "welcomed": job.payload["to"] }))
//!         }),
//!     )?
//!     .build();
//!
//!     let mut pool = WorkerPool::new(queue.clone(), registry, WorkerConfig::new().with_concurrency(4));
//!     pool.start()?;
//!
//!     queue
//!         .enqueue(
//!             "welcome-email",
//!             json!({ "to": "ada@example.com" }),
//!             JobOptions::new().with_priority(JobPriority::High),
//!         )
//!         .await?;
//!
//!     pool.stop().await
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Jobs
//!
//! A job is a unit of work with a UUID, a type name, a JSON payload and the
//! options it was created with. It moves through `waiting`/`delayed`,
//! `active`, and finally `completed` or `failed`.
//!
//! ### Stores
//!
//! A [`store::JobStore`] holds jobs and performs every state transition
//! atomically. [`store::MemoryStore`] is the in-process implementation.
//!
//! ### Worker pools
//!
//! A [`WorkerPool`] serves one queue. Its slots claim jobs in priority order,
//! run them through the registered handler for their type, and record the
//! outcome, retrying failed jobs according to their backoff policy.
//!
//! ### Service
//!
//! [`service::JobService`] is the client-facing API: enqueue by queue name,
//! look up, cancel and list jobs, read job history and statistics.

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod logging;
pub mod presets;
pub mod priority;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod service;
pub mod stats;
pub mod store;
pub mod worker;

pub use clock::{Clock, MockClock, SystemClock, TokioClock};
pub use config::{JobsmithConfig, LoggingConfig, QueueSettings};
pub use error::JobsmithError;
pub use executor::{Executor, JobHandler, ProcessorRegistry};
pub use job::{
    DefaultJobOptions, Job, JobId, JobOptions, JobStatus, JobView, Retention, RetentionPolicy,
};
pub use priority::JobPriority;
pub use queue::Queue;
pub use rate_limit::{RateLimit, RateLimiter};
pub use registry::QueueRegistry;
pub use retry::{BackoffKind, BackoffPolicy, RetryDecision};
pub use service::{JobService, ListQuery};
pub use stats::{
    InMemoryStatsCollector, JobEvent, JobEventType, JobStatistics, StatisticsCollector,
    StatsAggregator, StatsSnapshot,
};
pub use store::{JobCounts, JobStore, MemoryStore, Removal};
pub use worker::{WorkerConfig, WorkerPool};

/// Convenient type alias for Results with [`JobsmithError`] as the error type.
///
/// This is used throughout the crate for consistent error handling.
pub type Result<T> = std::result::Result<T, JobsmithError>;
