//! Queue error types.

use docket_models::JobStatus;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: JobStatus,
    },

    #[error("Job {0} was claimed again under another lease")]
    LeaseLost(String),

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::DocumentNotFound(id.into())
    }

    pub fn invalid_transition(job_id: impl Into<String>, from: impl Into<String>, to: JobStatus) -> Self {
        Self::InvalidTransition {
            job_id: job_id.into(),
            from: from.into(),
            to,
        }
    }

    pub fn lease_lost(job_id: impl Into<String>) -> Self {
        Self::LeaseLost(job_id.into())
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Errors that retrying the same call cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            QueueError::JobNotFound(_)
                | QueueError::DocumentNotFound(_)
                | QueueError::InvalidTransition { .. }
                | QueueError::LeaseLost(_)
                | QueueError::Corrupt { .. }
        )
    }

    /// The caller no longer holds the job: its lease was reaped, and the
    /// job was resolved or claimed again since.
    pub fn is_lease_lost(&self) -> bool {
        matches!(
            self,
            QueueError::LeaseLost(_) | QueueError::InvalidTransition { .. }
        )
    }
}
