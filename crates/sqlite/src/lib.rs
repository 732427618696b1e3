//! SQLite driver for the jobq job queue.
//!
//! Stores job rows in a single table. SQLite has no `SKIP LOCKED`, and its
//! storage is process-local anyway, so the in-flight claim is an in-process
//! set guarded by a mutex: the claim check and insertion happen under one
//! guard, which gives concurrent `get_next` callers the same
//! at-most-one-holder guarantee a row lock would.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jobq_sqlite::SqliteDriver;
//! use jobq_core::{DriverConfig, QueueConfig, QueueManager};
//!
//! #[tokio::main]
//! async fn main() -> jobq_core::Result<()> {
//!     let driver = SqliteDriver::new("sqlite:jobs.db", DriverConfig::default()).await?;
//!     let manager = QueueManager::new(driver, registry, QueueConfig::default());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobq_core::{
    current_timestamp, Driver, DriverConfig, JobId, JobRecord, QueueError, Result, StoreOptions,
};

type Row = (i64, String, String, i64, i64, i64, bool);

/// SQLite driver for job queue storage.
#[derive(Clone)]
pub struct SqliteDriver {
    pool: SqlitePool,
    config: DriverConfig,
    claimed: Arc<Mutex<HashSet<i64>>>,
}

impl SqliteDriver {
    /// Create a new SQLite driver.
    ///
    /// The database_url should be in the format: `sqlite:path/to/db.sqlite`
    /// or `sqlite::memory:`
    pub async fn new(database_url: &str, config: DriverConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite works best with single connection for writes
            .connect(database_url)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to connect to SQLite: {}", e)))?;

        let driver = Self {
            pool,
            config,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        };

        driver.init_table().await?;

        Ok(driver)
    }

    /// Create an in-memory SQLite driver (useful for testing).
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", DriverConfig::default()).await
    }

    /// Initialize the job table and its availability index.
    async fn init_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                class_path TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                available_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0
            )
            "#,
            self.table()
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to create jobs table: {}", e)))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_available_at ON {} (available_at)",
            self.table(),
            self.table()
        ))
        .execute(&self.pool)
        .await
        .ok();

        Ok(())
    }

    fn table(&self) -> &str {
        &self.config.table_name
    }

    fn release(&self, id: JobId) {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id.0);
    }

    fn to_record(row: Row) -> Result<JobRecord> {
        let (id, class_path, payload, created_at, available_at, attempts, failed) = row;
        Ok(JobRecord {
            id: JobId(id),
            class_path,
            payload: serde_json::from_str(&payload)?,
            created_at,
            available_at,
            attempts: attempts as u32,
            failed,
        })
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn store(&self, class_path: &str, payload: &Value, options: StoreOptions) -> Result<()> {
        let now = current_timestamp();
        sqlx::query(&format!(
            "INSERT INTO {} (class_path, payload, created_at, available_at, attempts, failed) \
             VALUES (?, ?, ?, ?, 0, 0)",
            self.table()
        ))
        .bind(class_path)
        .bind(payload.to_string())
        .bind(now)
        .bind(options.available_at.unwrap_or(now))
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to store job: {}", e)))?;
        Ok(())
    }

    async fn get_next(&self) -> Result<Option<JobRecord>> {
        let now = current_timestamp();

        // Any unclaimed eligible row must sit within the first
        // claimed-count + 1 rows of the eligibility ordering.
        let batch = {
            let claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
            claimed.len() + 1
        };

        let rows: Vec<Row> = sqlx::query_as(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE available_at <= ? AND failed = 0 \
             ORDER BY available_at, id LIMIT ?",
            self.table()
        ))
        .bind(now)
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to fetch next job: {}", e)))?;

        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        for row in rows {
            if claimed.insert(row.0) {
                drop(claimed);
                return Self::to_record(row).map(Some);
            }
        }
        Ok(None)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let now = current_timestamp();
        let row: Option<Row> = sqlx::query_as(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE id = ? AND available_at <= ? AND failed = 0",
            self.table()
        ))
        .bind(id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to fetch job: {}", e)))?;

        row.map(Self::to_record).transpose()
    }

    async fn re_schedule(&self, job: &JobRecord, retry_after: u64) -> Result<()> {
        self.release(job.id);

        let result = sqlx::query(&format!(
            "UPDATE {} SET attempts = ?, available_at = ? WHERE id = ?",
            self.table()
        ))
        .bind(job.attempts as i64)
        .bind(current_timestamp() + retry_after as i64)
        .bind(job.id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to re-schedule job: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(())
    }

    async fn mark_failed(&self, job: &JobRecord) -> Result<()> {
        self.release(job.id);

        let result = sqlx::query(&format!(
            "UPDATE {} SET failed = 1, attempts = ? WHERE id = ?",
            self.table()
        ))
        .bind(job.attempts as i64)
        .bind(job.id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to mark job failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        self.release(id);

        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table()))
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to remove job: {}", e)))?;
        Ok(())
    }

    async fn pending_len(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE failed = 0",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to count pending jobs: {}", e)))?;
        Ok(row.0 as usize)
    }

    async fn failed_len(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE failed = 1",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to count failed jobs: {}", e)))?;
        Ok(row.0 as usize)
    }

    async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        let rows: Vec<Row> = sqlx::query_as(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE failed = 1 ORDER BY id DESC LIMIT ? OFFSET ?",
            self.table()
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to list failed jobs: {}", e)))?;

        rows.into_iter().map(Self::to_record).collect()
    }

    fn polling_delay(&self) -> Duration {
        self.config.polling_delay
    }
}
