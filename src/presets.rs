//! The standard queues: `email`, `notification` and `processing`.
//!
//! Each queue comes with its job defaults, its pool settings and helpers that
//! enqueue the job types it understands with the right priority.

use crate::{
    Result,
    clock::Clock,
    config::JobsmithConfig,
    job::{DefaultJobOptions, Job, JobOptions, Retention, RetentionPolicy},
    priority::JobPriority,
    queue::Queue,
    rate_limit::RateLimit,
    registry::QueueRegistry,
    retry::BackoffPolicy,
    store::JobStore,
    worker::WorkerConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};

pub const EMAIL_QUEUE: &str = "email";
pub const NOTIFICATION_QUEUE: &str = "notification";
pub const PROCESSING_QUEUE: &str = "processing";

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 24 * HOUR_SECS;

/// Job type names. The last entry of each group is the queue's default.
pub mod job_types {
    pub const WELCOME_EMAIL: &str = "welcome-email";
    pub const PASSWORD_RESET: &str = "password-reset";
    pub const NOTIFICATION_EMAIL: &str = "notification-email";
    pub const SEND_EMAIL: &str = "send-email";

    pub const PUSH_NOTIFICATION: &str = "push-notification";
    pub const SMS_NOTIFICATION: &str = "sms-notification";
    pub const IN_APP_NOTIFICATION: &str = "in-app-notification";
    pub const SEND_NOTIFICATION: &str = "send-notification";

    pub const IMAGE_PROCESSING: &str = "image-processing";
    pub const DATA_EXPORT: &str = "data-export";
    pub const REPORT_GENERATION: &str = "report-generation";
    pub const PROCESS_DATA: &str = "process-data";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJobData {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationChannel {
    Push,
    Sms,
    InApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJobData {
    pub user_id: String,
    pub message: String,
    pub channel: NotificationChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InAppKind {
    Info,
    Warning,
    Error,
    Success,
}

pub fn email_defaults() -> DefaultJobOptions {
    DefaultJobOptions {
        priority: JobPriority::Medium,
        max_attempts: 3,
        backoff: BackoffPolicy::exponential(1000),
        retention: Retention {
            on_complete: RetentionPolicy::keep(Some(DAY_SECS), Some(1000)),
            on_fail: RetentionPolicy::keep(Some(7 * DAY_SECS), None),
        },
        timeout: None,
    }
}

pub fn notification_defaults() -> DefaultJobOptions {
    DefaultJobOptions {
        priority: JobPriority::Medium,
        max_attempts: 5,
        backoff: BackoffPolicy::exponential(1000),
        retention: Retention {
            on_complete: RetentionPolicy::keep(Some(DAY_SECS), Some(1000)),
            on_fail: RetentionPolicy::keep(Some(3 * DAY_SECS), None),
        },
        timeout: None,
    }
}

pub fn processing_defaults() -> DefaultJobOptions {
    DefaultJobOptions {
        priority: JobPriority::Medium,
        max_attempts: 2,
        backoff: BackoffPolicy::fixed(5000),
        retention: Retention {
            on_complete: RetentionPolicy::keep(Some(DAY_SECS), Some(500)),
            on_fail: RetentionPolicy::keep(Some(7 * DAY_SECS), None),
        },
        timeout: Some(Duration::from_millis(300_000)),
    }
}

pub fn email_pool(max_concurrency: usize) -> WorkerConfig {
    WorkerConfig::new()
        .with_concurrency(max_concurrency.max(1))
        .with_rate_limit(RateLimit::per_second(50))
}

pub fn notification_pool(max_concurrency: usize) -> WorkerConfig {
    WorkerConfig::new()
        .with_concurrency(max_concurrency.max(1))
        .with_rate_limit(RateLimit::per_second(100))
}

/// Processing jobs are heavy, so the pool runs at half the usual width.
pub fn processing_pool(max_concurrency: usize) -> WorkerConfig {
    WorkerConfig::new()
        .with_concurrency((max_concurrency / 2).max(1))
        .with_rate_limit(RateLimit::per_minute(20))
}

/// Defaults for a standard queue name.
pub fn defaults_for(queue_name: &str) -> Option<DefaultJobOptions> {
    match queue_name {
        EMAIL_QUEUE => Some(email_defaults()),
        NOTIFICATION_QUEUE => Some(notification_defaults()),
        PROCESSING_QUEUE => Some(processing_defaults()),
        _ => None,
    }
}

/// Pool settings for a standard queue name.
pub fn pool_for(queue_name: &str, max_concurrency: usize) -> Option<WorkerConfig> {
    match queue_name {
        EMAIL_QUEUE => Some(email_pool(max_concurrency)),
        NOTIFICATION_QUEUE => Some(notification_pool(max_concurrency)),
        PROCESSING_QUEUE => Some(processing_pool(max_concurrency)),
        _ => None,
    }
}

/// Handles to the three standard queues.
#[derive(Debug, Clone)]
pub struct StandardQueues {
    pub email: Arc<Queue>,
    pub notification: Arc<Queue>,
    pub processing: Arc<Queue>,
}

impl StandardQueues {
    /// Create the standard queues on `store` with their preset defaults and
    /// register them.
    pub async fn register(
        registry: &QueueRegistry,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::register_configured(registry, store, clock, &JobsmithConfig::default()).await
    }

    /// Like [`register`](Self::register), with the per-queue overrides from
    /// `config` applied to the defaults.
    pub async fn register_configured(
        registry: &QueueRegistry,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        config: &JobsmithConfig,
    ) -> Self {
        let build = |name: &str| {
            Arc::new(
                Queue::new(name, Arc::clone(&store))
                    .with_defaults(config.job_defaults(name))
                    .with_clock(Arc::clone(&clock)),
            )
        };

        let queues = Self {
            email: build(EMAIL_QUEUE),
            notification: build(NOTIFICATION_QUEUE),
            processing: build(PROCESSING_QUEUE),
        };

        for queue in queues.all() {
            registry.register(queue).await;
        }
        queues
    }

    pub fn all(&self) -> [Arc<Queue>; 3] {
        [
            Arc::clone(&self.email),
            Arc::clone(&self.notification),
            Arc::clone(&self.processing),
        ]
    }

    pub async fn send_welcome_email(&self, email: &str, name: &str) -> Result<Job> {
        let data = EmailJobData {
            to: email.to_string(),
            subject: "Welcome to our service!".to_string(),
            body: format!("Hello {}, welcome to our service!", name),
        };
        self.email
            .enqueue(
                job_types::WELCOME_EMAIL,
                serde_json::to_value(data)?,
                JobOptions::new().with_priority(JobPriority::High),
            )
            .await
    }

    pub async fn send_password_reset_email(&self, email: &str, reset_token: &str) -> Result<Job> {
        let data = EmailJobData {
            to: email.to_string(),
            subject: "Password Reset Request".to_string(),
            body: format!("Use this token to reset your password: {}", reset_token),
        };
        self.email
            .enqueue(
                job_types::PASSWORD_RESET,
                serde_json::to_value(data)?,
                JobOptions::new()
                    .with_priority(JobPriority::High)
                    .with_max_attempts(5),
            )
            .await
    }

    pub async fn send_notification_email(
        &self,
        email: &str,
        subject: &str,
        message: &str,
    ) -> Result<Job> {
        let data = EmailJobData {
            to: email.to_string(),
            subject: subject.to_string(),
            body: message.to_string(),
        };
        self.email
            .enqueue(
                job_types::NOTIFICATION_EMAIL,
                serde_json::to_value(data)?,
                JobOptions::new().with_priority(JobPriority::Medium),
            )
            .await
    }

    pub async fn send_push_notification(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Job> {
        let payload = NotificationJobData {
            user_id: user_id.to_string(),
            message: body.to_string(),
            channel: NotificationChannel::Push,
            metadata: Some(json!({ "title": title, "data": data })),
        };
        self.notification
            .enqueue(
                job_types::PUSH_NOTIFICATION,
                serde_json::to_value(payload)?,
                JobOptions::new().with_priority(JobPriority::Medium),
            )
            .await
    }

    pub async fn send_sms_notification(
        &self,
        user_id: &str,
        phone_number: &str,
        message: &str,
    ) -> Result<Job> {
        let payload = NotificationJobData {
            user_id: user_id.to_string(),
            message: message.to_string(),
            channel: NotificationChannel::Sms,
            metadata: Some(json!({ "phoneNumber": phone_number })),
        };
        self.notification
            .enqueue(
                job_types::SMS_NOTIFICATION,
                serde_json::to_value(payload)?,
                JobOptions::new().with_priority(JobPriority::High),
            )
            .await
    }

    pub async fn send_in_app_notification(
        &self,
        user_id: &str,
        message: &str,
        kind: InAppKind,
    ) -> Result<Job> {
        let payload = NotificationJobData {
            user_id: user_id.to_string(),
            message: message.to_string(),
            channel: NotificationChannel::InApp,
            metadata: Some(json!({ "type": kind })),
        };
        self.notification
            .enqueue(
                job_types::IN_APP_NOTIFICATION,
                serde_json::to_value(payload)?,
                JobOptions::new().with_priority(JobPriority::Low),
            )
            .await
    }

    pub async fn process_image(&self, image_url: &str, operations: &[&str]) -> Result<Job> {
        self.processing
            .enqueue(
                job_types::IMAGE_PROCESSING,
                json!({ "imageUrl": image_url, "operations": operations }),
                JobOptions::new().with_priority(JobPriority::Medium),
            )
            .await
    }

    /// Exports get a ten minute deadline instead of the queue's five.
    pub async fn export_data(
        &self,
        user_id: &str,
        filters: serde_json::Value,
        format: &str,
    ) -> Result<Job> {
        self.processing
            .enqueue(
                job_types::DATA_EXPORT,
                json!({ "userId": user_id, "filters": filters, "format": format }),
                JobOptions::new()
                    .with_priority(JobPriority::Low)
                    .with_timeout(Duration::from_millis(600_000)),
            )
            .await
    }

    pub async fn generate_report(
        &self,
        report_type: &str,
        parameters: serde_json::Value,
    ) -> Result<Job> {
        self.processing
            .enqueue(
                job_types::REPORT_GENERATION,
                json!({ "reportType": report_type, "parameters": parameters }),
                JobOptions::new().with_priority(JobPriority::Medium),
            )
            .await
    }
}
