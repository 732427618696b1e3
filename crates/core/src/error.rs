//! Error types for the jobq job queue library.

use thiserror::Error;

use crate::record::JobId;

/// The main error type for the jobq library.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Transient storage failure (connection loss, timeout, lock conflict).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The referenced job row no longer exists.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// No job implementation is registered for a class path.
    #[error("No job registered for class path: {0}")]
    Resolution(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Whether a bounded-backoff retry of the failed call makes sense.
    ///
    /// Only storage errors are transient; everything else fails the same
    /// way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Storage(_))
    }
}

/// Result type alias using QueueError.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_storage() {
        let err = QueueError::Storage("connection refused".to_string());
        assert_eq!(format!("{}", err), "Storage error: connection refused");
    }

    #[test]
    fn test_error_display_not_found() {
        let err = QueueError::NotFound(JobId(42));
        assert_eq!(format!("{}", err), "Job not found: 42");
    }

    #[test]
    fn test_error_display_resolution() {
        let err = QueueError::Resolution("App/Jobs/Missing".to_string());
        assert_eq!(
            format!("{}", err),
            "No job registered for class path: App/Jobs/Missing"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = QueueError::Config("workers must be non-zero".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: workers must be non-zero"
        );
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::Storage("timeout".into()).is_transient());
        assert!(!QueueError::NotFound(JobId(1)).is_transient());
        assert!(!QueueError::Resolution("x".into()).is_transient());
        assert!(!QueueError::Config("x".into()).is_transient());
    }
}
