//! Worker loop: fetch, dispatch, settle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::driver::{Driver, SharedDriver};
use crate::error::{QueueError, Result};
use crate::record::JobRecord;
use crate::registry::JobRegistry;
use crate::retry::with_backoff;

/// Individual worker that polls the driver and executes due jobs.
pub(crate) struct Worker {
    id: usize,
    driver: SharedDriver,
    registry: Arc<JobRegistry>,
    running: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    in_progress: Arc<AtomicUsize>,
    drain_notify: Arc<Notify>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        driver: SharedDriver,
        registry: Arc<JobRegistry>,
        running: Arc<AtomicBool>,
        draining: Arc<AtomicBool>,
        in_progress: Arc<AtomicUsize>,
        drain_notify: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            driver,
            registry,
            running,
            draining,
            in_progress,
            drain_notify,
        }
    }

    pub(crate) async fn run(&self) -> Result<()> {
        tracing::debug!(worker_id = self.id, "Worker started");

        while self.running.load(Ordering::SeqCst) {
            // Draining: finish nothing new, exit before the next fetch.
            if self.draining.load(Ordering::SeqCst) {
                tracing::debug!(worker_id = self.id, "Worker draining, stopping fetch");
                break;
            }

            match self.poll_once().await {
                Ok(true) => {
                    // Processed a job, immediately look for the next one.
                }
                Ok(false) => {
                    tokio::time::sleep(self.driver.polling_delay()).await;
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, "Worker fetch error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }

        tracing::debug!(worker_id = self.id, "Worker stopped");
        Ok(())
    }

    /// Fetch and process at most one job. Returns whether a job was found.
    pub(crate) async fn poll_once(&self) -> Result<bool> {
        let record = match self.driver.get_next().await? {
            Some(record) => record,
            None => return Ok(false),
        };

        self.in_progress.fetch_add(1, Ordering::SeqCst);
        self.process(record).await;
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.drain_notify.notify_one();

        Ok(true)
    }

    /// Run one execution attempt for a claimed record and settle its row.
    ///
    /// Settlement failures are logged, never propagated: the job body must
    /// not be re-executed on a bookkeeping error, and the lapsed claim
    /// re-offers the row later (at-least-once delivery).
    async fn process(&self, mut record: JobRecord) {
        let job = match self.registry.resolve(&record.class_path) {
            Ok(job) => job,
            Err(e) => {
                // Unknown class path: retrying resolves identically, so the
                // row is failed without consuming an attempt.
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %record.id,
                    class_path = %record.class_path,
                    error = %e,
                    "Job class path did not resolve, marking failed"
                );
                self.settle("mark_failed", || self.driver.mark_failed(&record))
                    .await;
                return;
            }
        };

        tracing::debug!(
            worker_id = self.id,
            job_id = %record.id,
            class_path = %record.class_path,
            attempt = record.attempts + 1,
            "Processing job"
        );

        let result = job.execute(&record.payload).await;
        record.attempts += 1;

        match result {
            Ok(()) => {
                tracing::debug!(
                    worker_id = self.id,
                    job_id = %record.id,
                    "Job completed successfully"
                );
                self.settle("remove", || self.driver.remove(record.id)).await;
            }
            Err(err) if err.retryable && record.attempts <= job.retries() => {
                let retry_after = job.retry_after(record.attempts);
                tracing::debug!(
                    worker_id = self.id,
                    job_id = %record.id,
                    attempts = record.attempts,
                    retry_after = retry_after,
                    error = %err.message,
                    "Job failed, scheduling retry"
                );
                self.settle("re_schedule", || self.driver.re_schedule(&record, retry_after))
                    .await;
            }
            Err(err) => {
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %record.id,
                    attempts = record.attempts,
                    error = %err.message,
                    "Job failed permanently"
                );
                self.settle("mark_failed", || self.driver.mark_failed(&record))
                    .await;
            }
        }
    }

    /// Run a settlement call with bounded backoff on transient errors.
    async fn settle<F, Fut>(&self, op: &str, call: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match with_backoff(op, call).await {
            Ok(()) => {}
            Err(QueueError::NotFound(id)) => {
                // The row vanished underneath us (concurrent removal).
                tracing::warn!(worker_id = self.id, job_id = %id, op = op, "Row already gone");
            }
            Err(e) => {
                tracing::error!(
                    worker_id = self.id,
                    op = op,
                    error = %e,
                    "Settlement failed after retries; row will be re-offered"
                );
            }
        }
    }
}
