//! Driver abstraction for job queue storage.
//!
//! This module provides the trait-based contract that allows the queue to
//! work with different storage backends (SQLite, PostgreSQL, Redis, memory).
//! The driver is the sole owner of persistence semantics; callers depend
//! only on this trait.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DEFAULT_POLLING_DELAY;
use crate::error::Result;
use crate::record::{JobId, JobRecord, StoreOptions};

/// Storage contract for job rows.
///
/// Implementations must be thread-safe (Send + Sync). All operations are
/// asynchronous and fail with [`QueueError::Storage`] on transient
/// infrastructure errors or [`QueueError::NotFound`] when an operation
/// requires a row that no longer exists.
///
/// [`QueueError::Storage`]: crate::QueueError::Storage
/// [`QueueError::NotFound`]: crate::QueueError::NotFound
#[async_trait]
pub trait Driver: Send + Sync {
    /// Insert a new job row with `attempts = 0` and `failed = false`.
    ///
    /// `available_at` defaults to "now" unless overridden via `options`.
    /// On error the caller must not assume the job was enqueued.
    async fn store(&self, class_path: &str, payload: &Value, options: StoreOptions) -> Result<()>;

    /// Claim and return the single oldest eligible row, or `None`.
    ///
    /// Eligible means `available_at <= now` and `failed = false`; ordering
    /// is `available_at` ascending with ties broken by `id` ascending.
    /// Rows already held in-flight by another worker are skipped, never
    /// blocked on, and the read plus claim happen in one atomic step
    /// relative to concurrent `get_next` calls.
    async fn get_next(&self) -> Result<Option<JobRecord>>;

    /// Return the row with that id if it is currently eligible, else `None`.
    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Persist the row's attempt count and push `available_at` forward by
    /// `retry_after` seconds from now. Releases the in-flight claim.
    ///
    /// Returns [`QueueError::NotFound`] if the row no longer exists.
    ///
    /// [`QueueError::NotFound`]: crate::QueueError::NotFound
    async fn re_schedule(&self, job: &JobRecord, retry_after: u64) -> Result<()>;

    /// Set `failed = true` and persist the final attempt count. The row is
    /// retained for inspection, permanently ineligible for dequeue.
    /// Releases the in-flight claim.
    ///
    /// Returns [`QueueError::NotFound`] if the row no longer exists.
    ///
    /// [`QueueError::NotFound`]: crate::QueueError::NotFound
    async fn mark_failed(&self, job: &JobRecord) -> Result<()>;

    /// Delete the row. Idempotent: removing an absent id is not an error.
    /// Releases the in-flight claim.
    async fn remove(&self, id: JobId) -> Result<()>;

    /// Number of rows not terminally failed (pending or in-flight).
    async fn pending_len(&self) -> Result<usize>;

    /// Number of terminally failed rows.
    async fn failed_len(&self) -> Result<usize>;

    /// List terminally failed rows, newest first, with pagination.
    async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>>;

    /// How long a worker should sleep when `get_next` finds nothing.
    fn polling_delay(&self) -> Duration {
        DEFAULT_POLLING_DELAY
    }
}

/// A type-erased driver that can be shared across threads.
pub type DynDriver = Arc<dyn Driver>;

/// Wrapper around `Arc<dyn Driver>` for convenience.
#[derive(Clone)]
pub struct SharedDriver {
    inner: DynDriver,
}

impl SharedDriver {
    /// Create a new SharedDriver from any Driver implementation.
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self {
            inner: Arc::new(driver),
        }
    }

    /// Get a reference to the inner driver.
    pub fn inner(&self) -> &DynDriver {
        &self.inner
    }
}

#[async_trait]
impl Driver for SharedDriver {
    async fn store(&self, class_path: &str, payload: &Value, options: StoreOptions) -> Result<()> {
        self.inner.store(class_path, payload, options).await
    }

    async fn get_next(&self) -> Result<Option<JobRecord>> {
        self.inner.get_next().await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.inner.get_job(id).await
    }

    async fn re_schedule(&self, job: &JobRecord, retry_after: u64) -> Result<()> {
        self.inner.re_schedule(job, retry_after).await
    }

    async fn mark_failed(&self, job: &JobRecord) -> Result<()> {
        self.inner.mark_failed(job).await
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        self.inner.remove(id).await
    }

    async fn pending_len(&self) -> Result<usize> {
        self.inner.pending_len().await
    }

    async fn failed_len(&self) -> Result<usize> {
        self.inner.failed_len().await
    }

    async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        self.inner.list_failed(limit, offset).await
    }

    fn polling_delay(&self) -> Duration {
        self.inner.polling_delay()
    }
}
