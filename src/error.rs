use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobsmithError {
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Job timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Registration error: {message}")]
    Registration { message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobsmithError {
    /// Shorthand for a handler failure with the given message.
    pub fn handler(message: impl Into<String>) -> Self {
        JobsmithError::Handler {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        JobsmithError::Validation {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        JobsmithError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// The job's own execution failed. These feed the retry engine and are
    /// never surfaced as system errors.
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self,
            JobsmithError::Handler { .. } | JobsmithError::Timeout { .. }
        )
    }

    /// Infrastructure failures the calling layer should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobsmithError::StoreUnavailable { .. })
    }

    /// Errors caused by the caller (404/400 equivalents).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobsmithError::JobNotFound { .. }
                | JobsmithError::QueueNotFound { .. }
                | JobsmithError::Validation { .. }
        )
    }
}

impl From<toml::de::Error> for JobsmithError {
    fn from(err: toml::de::Error) -> Self {
        JobsmithError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for JobsmithError {
    fn from(err: toml::ser::Error) -> Self {
        JobsmithError::Config(format!("TOML serialization error: {}", err))
    }
}
