//! Common error types for MedScan

use thiserror::Error;

/// Common result type for MedScan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across MedScan services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested scan or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the target state already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External process crashed or produced unusable output
    ///
    /// `message` is safe to show to callers; `detail` is for logs only.
    #[error("Upstream failure: {message} ({detail})")]
    Upstream { message: String, detail: String },

    /// External process exceeded its time budget and was terminated
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], used by the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    UpstreamFailure,
    Timeout,
    Internal,
}

impl Error {
    /// Build an upstream failure from a public message and a private detail
    pub fn upstream(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Upstream {
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InvalidInput(_) => ErrorKind::InvalidArgument,
            Error::Upstream { .. } => ErrorKind::UpstreamFailure,
            Error::Timeout(_) => ErrorKind::Timeout,
            #[cfg(feature = "sqlx")]
            Error::Database(_) => ErrorKind::Internal,
            Error::Io(_) | Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::NotFound("scan".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("dup".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::InvalidInput("bad".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            Error::upstream("Invalid model output", "eof").kind(),
            ErrorKind::UpstreamFailure
        );
        assert_eq!(Error::Timeout("classifier".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_upstream_display_keeps_detail_for_logs() {
        let err = Error::upstream("Invalid model output", "expected value at line 1");
        let text = err.to_string();
        assert!(text.contains("Invalid model output"));
        assert!(text.contains("expected value at line 1"));
    }
}
