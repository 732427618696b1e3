//! Registry mapping class-path strings to executable job implementations.
//!
//! Resolution by string happens at dispatch time; the registry is populated
//! once at process start. A lookup miss is a first-class
//! [`QueueError::Resolution`], never a crash.
//!
//! [`QueueError::Resolution`]: crate::QueueError::Resolution

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobError, JobResult};

/// Object-safe view of a registered [`Job`], with payload decoding folded in.
#[async_trait]
pub trait ErasedJob: Send + Sync {
    /// The class path this job was registered under.
    fn class_path(&self) -> &str;

    /// Maximum number of retries after the initial attempt.
    fn retries(&self) -> u32;

    /// Seconds to wait before the next attempt.
    fn retry_after(&self, attempt: u32) -> u64;

    /// Decode the stored payload and run the job body.
    async fn execute(&self, payload: &Value) -> JobResult;
}

impl std::fmt::Debug for dyn ErasedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedJob")
            .field("class_path", &self.class_path())
            .finish()
    }
}

struct ErasedJobAdapter<J> {
    job: J,
    class_path: &'static str,
}

#[async_trait]
impl<J: Job> ErasedJob for ErasedJobAdapter<J> {
    fn class_path(&self) -> &str {
        self.class_path
    }

    fn retries(&self) -> u32 {
        self.job.retries()
    }

    fn retry_after(&self, attempt: u32) -> u64 {
        self.job.retry_after(attempt)
    }

    async fn execute(&self, payload: &Value) -> JobResult {
        // A payload that does not decode will never decode; do not burn retries.
        let payload: J::Payload = serde_json::from_value(payload.clone())
            .map_err(|e| JobError::fatal(format!("payload decode failed: {}", e)))?;
        self.job.execute(payload).await
    }
}

/// Mapping from class-path strings to job implementations.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn ErasedJob>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job implementation under its class path.
    ///
    /// Registering the same class path twice replaces the earlier entry.
    pub fn register<J: Job>(&mut self, job: J) -> &mut Self {
        let class_path = J::class_path();
        self.jobs.insert(
            class_path.to_string(),
            Arc::new(ErasedJobAdapter { job, class_path }),
        );
        self
    }

    /// Resolve a class path to its registered implementation.
    pub fn resolve(&self, class_path: &str) -> Result<Arc<dyn ErasedJob>> {
        self.jobs
            .get(class_path)
            .cloned()
            .ok_or_else(|| QueueError::Resolution(class_path.to_string()))
    }

    /// Whether a class path has a registered implementation.
    pub fn contains(&self, class_path: &str) -> bool {
        self.jobs.contains_key(class_path)
    }

    /// Number of registered job types.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Greeting {
        name: String,
    }

    struct GreetJob;

    #[async_trait]
    impl Job for GreetJob {
        type Payload = Greeting;

        fn class_path() -> &'static str {
            "App/Jobs/Greet"
        }

        fn retries(&self) -> u32 {
            1
        }

        async fn execute(&self, payload: Greeting) -> JobResult {
            if payload.name.is_empty() {
                return Err(JobError::retryable("empty name"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_resolve_registered() {
        let mut registry = JobRegistry::new();
        registry.register(GreetJob);

        let job = registry.resolve("App/Jobs/Greet").unwrap();
        assert_eq!(job.class_path(), "App/Jobs/Greet");
        assert_eq!(job.retries(), 1);
    }

    #[test]
    fn test_resolve_miss_is_resolution_error() {
        let registry = JobRegistry::new();
        let err = registry.resolve("App/Jobs/Unknown").unwrap_err();
        assert!(matches!(err, QueueError::Resolution(path) if path == "App/Jobs/Unknown"));
    }

    #[test]
    fn test_contains_and_len() {
        let mut registry = JobRegistry::new();
        assert!(registry.is_empty());

        registry.register(GreetJob);
        assert!(registry.contains("App/Jobs/Greet"));
        assert!(!registry.contains("App/Jobs/Other"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_erased_execute_decodes_payload() {
        let mut registry = JobRegistry::new();
        registry.register(GreetJob);

        let job = registry.resolve("App/Jobs/Greet").unwrap();
        let result = job.execute(&json!({"name": "Ada"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_erased_execute_bad_payload_is_fatal() {
        let mut registry = JobRegistry::new();
        registry.register(GreetJob);

        let job = registry.resolve("App/Jobs/Greet").unwrap();
        let err = job.execute(&json!({"unexpected": true})).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("payload decode failed"));
    }
}
