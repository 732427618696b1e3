//! The persisted job record and related types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Unique identifier for a job row, assigned by the store on insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job row as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Row identifier, assigned by the store.
    pub id: JobId,
    /// Identifier of the executable job type; opaque to the driver.
    pub class_path: String,
    /// Arbitrary structured payload handed to the job at execution time.
    pub payload: Value,
    /// Unix timestamp (seconds) of enqueue.
    pub created_at: i64,
    /// Unix timestamp (seconds) before which the row must not be dequeued.
    pub available_at: i64,
    /// Number of execution attempts so far.
    pub attempts: u32,
    /// Terminal-failure flag; failed rows are never dequeued.
    pub failed: bool,
}

impl JobRecord {
    /// The dequeue eligibility predicate: due and not terminally failed.
    pub fn is_eligible(&self, now: i64) -> bool {
        !self.failed && self.available_at <= now
    }
}

/// Options for storing a new job row.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Unix timestamp (seconds) before which the job must not run.
    /// Defaults to "now" when unset.
    pub available_at: Option<i64>,
}

impl StoreOptions {
    /// Make the job available at a specific Unix timestamp.
    pub fn at(available_at: i64) -> Self {
        Self {
            available_at: Some(available_at),
        }
    }

    /// Make the job available after a delay from now.
    pub fn delayed(delay: Duration) -> Self {
        Self::at(current_timestamp() + delay.as_secs() as i64)
    }
}

/// Get current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(available_at: i64, failed: bool) -> JobRecord {
        JobRecord {
            id: JobId(1),
            class_path: "App/Jobs/SendEmail".to_string(),
            payload: json!({"to": "a@b.com"}),
            created_at: 1_000,
            available_at,
            attempts: 0,
            failed,
        }
    }

    #[test]
    fn test_eligibility_due_row() {
        assert!(record(999, false).is_eligible(1_000));
        assert!(record(1_000, false).is_eligible(1_000));
    }

    #[test]
    fn test_eligibility_future_row() {
        assert!(!record(1_001, false).is_eligible(1_000));
    }

    #[test]
    fn test_eligibility_failed_row() {
        assert!(!record(0, true).is_eligible(1_000));
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let original = JobRecord {
            id: JobId(7),
            class_path: "App/Jobs/Resize".to_string(),
            payload: json!({"width": 800, "tags": ["a", "b"], "meta": {"retina": true}}),
            created_at: 1_700_000_000,
            available_at: 1_700_000_030,
            attempts: 2,
            failed: false,
        };

        let json = serde_json::to_string(&original).unwrap();
        let decoded: JobRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.class_path, original.class_path);
        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.available_at, original.available_at);
        assert_eq!(decoded.attempts, original.attempts);
        assert!(!decoded.failed);
    }

    #[test]
    fn test_store_options_default_is_unset() {
        assert!(StoreOptions::default().available_at.is_none());
    }

    #[test]
    fn test_store_options_delayed() {
        let before = current_timestamp();
        let options = StoreOptions::delayed(Duration::from_secs(60));
        let after = current_timestamp();

        let at = options.available_at.unwrap();
        assert!(at >= before + 60);
        assert!(at <= after + 60);
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(format!("{}", JobId(42)), "42");
    }

    #[test]
    fn test_current_timestamp_is_sane() {
        // After year 2020
        assert!(current_timestamp() > 1_577_836_800);
    }
}
