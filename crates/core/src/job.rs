//! The job abstraction: a user-supplied unit of work with retry policy.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

/// Error returned from a job body.
#[derive(Debug)]
pub struct JobError {
    /// Error message.
    pub message: String,
    /// Whether the execution should be retried.
    pub retryable: bool,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a new non-retryable error (the job is failed immediately).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl<E: std::error::Error> From<E> for JobError {
    fn from(err: E) -> Self {
        Self::retryable(err.to_string())
    }
}

/// A unit of work executable by the queue.
///
/// A job declares its stable class-path identifier (used for storage and
/// dispatch-time resolution), its retry budget, its backoff policy, and an
/// async execution entry point receiving the stored payload.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The payload type serialized at enqueue time and handed back to
    /// `execute`. Date/time values round-trip through their serde
    /// representation (RFC 3339 strings for chrono types).
    type Payload: Serialize + DeserializeOwned + Send;

    /// Stable identifier stored with each row and used to resolve the
    /// implementation at dispatch time.
    fn class_path() -> &'static str
    where
        Self: Sized;

    /// Maximum number of retries after the initial attempt.
    fn retries(&self) -> u32 {
        3
    }

    /// Seconds to wait before the next attempt.
    ///
    /// `attempt` is the number of executions performed so far, so
    /// implementations can compute attempt-dependent backoff, e.g.
    /// exponential: `10 * 2u64.pow(attempt - 1)`.
    fn retry_after(&self, _attempt: u32) -> u64 {
        10
    }

    /// Execute the job with its deserialized payload.
    async fn execute(&self, payload: Self::Payload) -> JobResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        target: String,
    }

    struct PingJob;

    #[async_trait]
    impl Job for PingJob {
        type Payload = Ping;

        fn class_path() -> &'static str {
            "App/Jobs/Ping"
        }

        async fn execute(&self, _payload: Ping) -> JobResult {
            Ok(())
        }
    }

    struct BackoffJob;

    #[async_trait]
    impl Job for BackoffJob {
        type Payload = ();

        fn class_path() -> &'static str {
            "App/Jobs/Backoff"
        }

        fn retries(&self) -> u32 {
            5
        }

        fn retry_after(&self, attempt: u32) -> u64 {
            10 * 2u64.pow(attempt.saturating_sub(1))
        }

        async fn execute(&self, _payload: ()) -> JobResult {
            Err(JobError::retryable("always fails"))
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let job = PingJob;
        assert_eq!(job.retries(), 3);
        assert_eq!(job.retry_after(1), 10);
        assert_eq!(job.retry_after(3), 10);
    }

    #[test]
    fn test_exponential_backoff_policy() {
        let job = BackoffJob;
        assert_eq!(job.retry_after(1), 10);
        assert_eq!(job.retry_after(2), 20);
        assert_eq!(job.retry_after(3), 40);
        assert_eq!(job.retry_after(4), 80);
    }

    #[test]
    fn test_job_error_constructors() {
        let err = JobError::retryable("soft");
        assert!(err.retryable);
        assert_eq!(err.message, "soft");

        let err = JobError::fatal("hard");
        assert!(!err.retryable);
        assert_eq!(err.message, "hard");
    }

    #[test]
    fn test_job_error_from_std_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err: JobError = io_err.into();
        assert!(err.retryable);
        assert!(err.message.contains("disk on fire"));
    }
}
