//! Queue manager: enqueue surface plus the worker pool orchestration.

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::config::QueueConfig;
use crate::driver::{Driver, SharedDriver};
use crate::error::Result;
use crate::job::Job;
use crate::record::{JobId, JobRecord, StoreOptions};
use crate::registry::JobRegistry;
use crate::retry::with_backoff;
use crate::worker::Worker;

/// Orchestrates enqueueing and the polling workers over one driver.
///
/// A manager is a plain value: construct as many independently configured
/// managers per process as there are queues to serve.
pub struct QueueManager {
    driver: SharedDriver,
    registry: Arc<JobRegistry>,
    config: QueueConfig,
    manager_id: String,
    running: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    in_progress: Arc<AtomicUsize>,
    drain_notify: Arc<Notify>,
}

impl QueueManager {
    /// Create a new manager over a driver and a populated registry.
    pub fn new(driver: impl Driver + 'static, registry: JobRegistry, config: QueueConfig) -> Self {
        Self {
            driver: SharedDriver::new(driver),
            registry: Arc::new(registry),
            config,
            manager_id: generate_manager_id(),
            running: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            in_progress: Arc::new(AtomicUsize::new(0)),
            drain_notify: Arc::new(Notify::new()),
        }
    }

    /// Identifier for this manager instance (host, pid, start time).
    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// Enqueue a job for immediate processing.
    ///
    /// The payload is serialized and stored durably; transient storage
    /// errors are retried with bounded backoff and then surfaced, so a
    /// returned `Ok` means the job is in the store and an `Err` means it
    /// is not.
    pub async fn enqueue<J: Job>(&self, payload: J::Payload) -> Result<()> {
        self.store_with_options::<J>(payload, StoreOptions::default())
            .await
    }

    /// Enqueue a job that becomes available after a delay.
    pub async fn enqueue_in<J: Job>(
        &self,
        payload: J::Payload,
        delay: std::time::Duration,
    ) -> Result<()> {
        self.store_with_options::<J>(payload, StoreOptions::delayed(delay))
            .await
    }

    /// Enqueue a job that becomes available at a Unix timestamp.
    pub async fn enqueue_at<J: Job>(&self, payload: J::Payload, available_at: i64) -> Result<()> {
        self.store_with_options::<J>(payload, StoreOptions::at(available_at))
            .await
    }

    async fn store_with_options<J: Job>(
        &self,
        payload: J::Payload,
        options: StoreOptions,
    ) -> Result<()> {
        let class_path = J::class_path();
        let payload: Value = serde_json::to_value(payload)?;

        with_backoff("store", || self.driver.store(class_path, &payload, options)).await?;

        tracing::debug!(class_path = class_path, "Job enqueued");
        Ok(())
    }

    /// Fetch a job row by id, if it is currently eligible.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.driver.get_job(id).await
    }

    /// Number of rows not terminally failed.
    pub async fn pending_len(&self) -> Result<usize> {
        self.driver.pending_len().await
    }

    /// Number of terminally failed rows.
    pub async fn failed_len(&self) -> Result<usize> {
        self.driver.failed_len().await
    }

    /// List terminally failed rows, newest first.
    pub async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        self.driver.list_failed(limit, offset).await
    }

    /// Run the worker pool until Ctrl+C, then drain gracefully.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
    }

    /// Run the worker pool until `shutdown` resolves, then drain.
    ///
    /// Draining lets in-flight jobs finish (bounded by the configured
    /// shutdown timeout) and stops workers before their next fetch.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        self.running.store(true, Ordering::SeqCst);
        self.draining.store(false, Ordering::SeqCst);

        let mut tasks = JoinSet::new();
        for worker_id in 0..self.config.workers.max(1) {
            let worker = Worker::new(
                worker_id,
                self.driver.clone(),
                self.registry.clone(),
                self.running.clone(),
                self.draining.clone(),
                self.in_progress.clone(),
                self.drain_notify.clone(),
            );
            tasks.spawn(async move { worker.run().await });
        }

        tracing::info!(
            manager_id = %self.manager_id,
            workers = self.config.workers.max(1),
            "Queue manager started"
        );

        shutdown.await;
        tracing::info!(manager_id = %self.manager_id, "Shutdown requested, draining");

        self.shutdown().await;

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        tracing::info!(manager_id = %self.manager_id, "Queue manager stopped");
        Ok(())
    }

    /// Initiate graceful shutdown: no new fetches, in-flight jobs finish.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while self.in_progress.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    in_progress = self.in_progress.load(Ordering::SeqCst),
                    "Shutdown timeout reached, forcing stop"
                );
                break;
            }

            tokio::select! {
                _ = self.drain_notify.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Number of jobs currently executing.
    pub fn in_progress_count(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Whether the manager is draining.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Generate a unique manager ID from host, pid and start time.
fn generate_manager_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    let ts = crate::record::current_timestamp();
    format!("{}-{}-{}", host, pid, ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::job::{Job, JobResult};
    use crate::memory::MemoryDriver;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Email {
        to: String,
    }

    struct SendEmail {
        sent: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Job for SendEmail {
        type Payload = Email;

        fn class_path() -> &'static str {
            "App/Jobs/SendEmail"
        }

        async fn execute(&self, _payload: Email) -> JobResult {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_run_until_processes_all() {
        let driver =
            MemoryDriver::with_config(DriverConfig::new().polling_delay(Duration::from_millis(10)));
        let sent = Arc::new(AtomicU32::new(0));

        let mut registry = JobRegistry::new();
        registry.register(SendEmail { sent: sent.clone() });

        let manager = QueueManager::new(
            driver.clone(),
            registry,
            QueueConfig::builder()
                .workers(2)
                .shutdown_timeout(Duration::from_secs(5))
                .build(),
        );

        for i in 0..5 {
            manager
                .enqueue::<SendEmail>(Email {
                    to: format!("user{}@example.com", i),
                })
                .await
                .unwrap();
        }
        assert_eq!(manager.pending_len().await.unwrap(), 5);

        manager
            .run_until(tokio::time::sleep(Duration::from_millis(500)))
            .await
            .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 5);
        assert_eq!(manager.pending_len().await.unwrap(), 0);
        assert_eq!(manager.in_progress_count(), 0);
        assert!(manager.is_draining());
    }

    #[tokio::test]
    async fn test_enqueue_in_delays_availability() {
        let driver = MemoryDriver::new();
        let mut registry = JobRegistry::new();
        registry.register(SendEmail {
            sent: Arc::new(AtomicU32::new(0)),
        });

        let manager = QueueManager::new(driver.clone(), registry, QueueConfig::default());
        manager
            .enqueue_in::<SendEmail>(
                Email {
                    to: "later@example.com".into(),
                },
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        // Stored but not yet due.
        assert_eq!(manager.pending_len().await.unwrap(), 1);
        assert!(driver.get_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_job_passthrough() {
        let driver = MemoryDriver::new();
        let mut registry = JobRegistry::new();
        registry.register(SendEmail {
            sent: Arc::new(AtomicU32::new(0)),
        });

        let manager = QueueManager::new(driver, registry, QueueConfig::default());
        manager
            .enqueue::<SendEmail>(Email {
                to: "a@b.com".into(),
            })
            .await
            .unwrap();

        let record = manager.get_job(JobId(1)).await.unwrap().unwrap();
        assert_eq!(record.class_path, "App/Jobs/SendEmail");
        assert_eq!(record.payload["to"], "a@b.com");
        assert!(manager.get_job(JobId(999)).await.unwrap().is_none());
    }

    #[test]
    fn test_manager_id_shape() {
        let id = generate_manager_id();
        assert!(id.split('-').count() >= 3);
    }
}
