//! Directory of the queues a process serves.
//!
//! The registry is constructed explicitly at startup and passed to whatever
//! needs cross-queue access (the job service, the stats aggregator, shutdown).

use crate::{JobsmithError, queue::Queue};
use futures_util::future::join_all;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Name to queue mapping.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: RwLock<HashMap<String, Arc<Queue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue under its name, replacing (and returning) any queue
    /// registered under the same name.
    pub async fn register(&self, queue: Arc<Queue>) -> Option<Arc<Queue>> {
        let name = queue.name().to_string();
        let previous = self.queues.write().await.insert(name.clone(), queue);
        if previous.is_some() {
            warn!(queue = %name, "Queue already registered, overwriting");
        } else {
            info!(queue = %name, "Queue registered");
        }
        previous
    }

    /// All registered queues, sorted by name.
    pub async fn get_all(&self) -> Vec<Arc<Queue>> {
        let queues = self.queues.read().await;
        let mut all: Vec<Arc<Queue>> = queues.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().await.get(name).cloned()
    }

    /// Like [`get_by_name`](Self::get_by_name), but a missing queue is an error.
    pub async fn require(&self, name: &str) -> crate::Result<Arc<Queue>> {
        self.get_by_name(name)
            .await
            .ok_or_else(|| JobsmithError::QueueNotFound {
                name: name.to_string(),
            })
    }

    pub async fn names(&self) -> Vec<String> {
        self.get_all()
            .await
            .iter()
            .map(|queue| queue.name().to_string())
            .collect()
    }

    /// Close every queue's store connection.
    ///
    /// Every queue gets a close attempt even when earlier ones fail. Returns
    /// the failures by queue name.
    pub async fn close_all(&self) -> Vec<(String, JobsmithError)> {
        let queues = self.get_all().await;
        let results = join_all(queues.iter().map(|queue| async move {
            (queue.name().to_string(), queue.close().await)
        }))
        .await;

        let failures: Vec<(String, JobsmithError)> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|error| (name, error)))
            .collect();

        for (name, error) in &failures {
            warn!(queue = %name, error = %error, "Failed to close queue");
        }
        info!(
            closed = queues.len() - failures.len(),
            failed = failures.len(),
            "Closed queue connections"
        );
        failures
    }
}
