//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Transcoder not found: {0}")]
    TranscoderNotFound(String),

    #[error("Transcode failed: {message}")]
    TranscodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Media exceeds maximum size of {limit} bytes")]
    SizeExceeded { limit: u64 },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a transcode failure error.
    pub fn transcode_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::TranscodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same input can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MediaError::SizeExceeded { .. }
                | MediaError::UnsupportedFormat(_)
                | MediaError::InvalidUrl(_)
                | MediaError::TranscoderNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_exceeded_message() {
        let err = MediaError::SizeExceeded { limit: 100 };
        assert!(err.to_string().contains("exceeds maximum size"));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_transient_errors_are_not_permanent() {
        assert!(!MediaError::download_failed("connection reset").is_permanent());
        assert!(!MediaError::transcode_failed("exit 1", None, Some(1)).is_permanent());
    }
}
