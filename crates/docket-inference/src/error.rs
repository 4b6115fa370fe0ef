//! Inference error types.

use thiserror::Error;

/// Result type for inference and extraction calls.
pub type InferenceResult<T> = Result<T, InferenceError>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Upstream rejected request ({status}): {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Failure reported by a service implementation, shown as-is
    #[error("{0}")]
    Service(String),
}

impl InferenceError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    pub fn extraction_failed(msg: impl Into<String>) -> Self {
        Self::ExtractionFailed(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::RequestFailed(_)
            | InferenceError::InvalidResponse(_)
            | InferenceError::Service(_) => true,
            InferenceError::UpstreamRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Failures that no retry can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            InferenceError::ConfigError(_) | InferenceError::UnsupportedFormat(_)
        )
    }
}
