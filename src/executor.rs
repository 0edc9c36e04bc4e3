//! Handler dispatch by job type.
//!
//! Each queue owns a [`ProcessorRegistry`]: an explicit table from job type
//! name to handler plus one default handler for every other type. The table is
//! assembled through [`ProcessorRegistryBuilder`] and checked while it is
//! being built, so a running pool never resolves a type it was not given.

use crate::{
    JobsmithError, Result,
    clock::{Clock, SystemClock},
    job::Job,
};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use tracing::debug;

/// A job handler. Returns the JSON result stored on the completed job.
pub type JobHandler = Arc<
    dyn Fn(Job) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`JobHandler`].
///
/// ```rust
/// use jobsmith::executor::handler;
/// use serde_json::json;
///
/// let send_email = handler(|job| async move {
///     let to = job.payload["to"].as_str().unwrap_or_default().to_string();
///     Ok(json!({ "delivered_to": to }))
/// });
/// # let _ = send_email;
/// ```
pub fn handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |job| Box::pin(f(job)))
}

/// Job type to handler bindings for one queue.
#[derive(Clone)]
pub struct ProcessorRegistry {
    handlers: HashMap<String, JobHandler>,
    default_handler: JobHandler,
}

impl ProcessorRegistry {
    /// Start a registry whose fallback is `default_handler`.
    pub fn builder(default_handler: JobHandler) -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder {
            handlers: HashMap::new(),
            default_handler,
        }
    }

    /// A registry that sends every job to one handler.
    pub fn single(handler: JobHandler) -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: handler,
        }
    }

    /// Handler for `type_name`, or the default handler.
    pub fn resolve(&self, type_name: &str) -> &JobHandler {
        self.handlers.get(type_name).unwrap_or(&self.default_handler)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Explicitly registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

/// Builder for [`ProcessorRegistry`].
pub struct ProcessorRegistryBuilder {
    handlers: HashMap<String, JobHandler>,
    default_handler: JobHandler,
}

impl ProcessorRegistryBuilder {
    /// Bind `type_name` to `handler`. Empty and duplicate names are rejected.
    pub fn register(mut self, type_name: &str, handler: JobHandler) -> Result<Self> {
        if type_name.trim().is_empty() {
            return Err(JobsmithError::Registration {
                message: "job type name must not be empty".to_string(),
            });
        }
        if self.handlers.contains_key(type_name) {
            return Err(JobsmithError::Registration {
                message: format!("handler for job type '{}' is already registered", type_name),
            });
        }

        self.handlers.insert(type_name.to_string(), handler);
        Ok(self)
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            handlers: self.handlers,
            default_handler: self.default_handler,
        }
    }
}

/// Runs a job's handler.
///
/// The executor does not enforce deadlines; the worker pool races it against
/// the job's timeout.
#[derive(Clone, Debug)]
pub struct Executor {
    registry: ProcessorRegistry,
    clock: Arc<dyn Clock>,
}

impl Executor {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self {
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Invoke the handler registered for the job's type.
    pub async fn execute(&self, mut job: Job) -> Result<serde_json::Value> {
        if job.processing_started_at.is_none() {
            job.processing_started_at = Some(self.clock.now());
        }

        let handler = Arc::clone(self.registry.resolve(&job.type_name));
        debug!(
            job_id = %job.id,
            queue = %job.queue_name,
            type_name = %job.type_name,
            attempt = job.attempts_made + 1,
            "Executing job"
        );
        handler(job).await
    }
}
