//! Worker error types.

use docket_models::DocumentId;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job has no document: {0}")]
    MissingDocument(String),

    #[error("Document {0} has no text to analyze")]
    MissingText(DocumentId),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Storage(#[from] docket_storage::StorageError),

    #[error(transparent)]
    Queue(#[from] docket_queue::QueueError),

    #[error(transparent)]
    Media(#[from] docket_media::MediaError),

    #[error(transparent)]
    Inference(#[from] docket_inference::InferenceError),
}

impl WorkerError {
    pub fn missing_document(job_id: impl Into<String>) -> Self {
        Self::MissingDocument(job_id.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// The job fails on the current attempt so the user sees the error.
    ///
    /// A missing blob or document row counts as permanent: ingestion writes
    /// both before it enqueues the job, so an absent one was deleted and will
    /// not come back on a later attempt. Transport failures reaching the
    /// store stay retryable.
    pub fn is_permanent(&self) -> bool {
        match self {
            WorkerError::MissingDocument(_) | WorkerError::ConfigError(_) => true,
            WorkerError::Storage(e) => e.is_permanent(),
            WorkerError::Queue(e) => e.is_permanent(),
            WorkerError::Media(e) => e.is_permanent(),
            WorkerError::Inference(e) => e.is_permanent(),
            // Text may still be on its way from an extract job.
            WorkerError::MissingText(_) => false,
            WorkerError::QuotaExceeded(_) => false,
        }
    }
}
