//! PostgreSQL driver for the jobq job queue.
//!
//! The lock-skipping read is the real thing here: `get_next` claims a row
//! with `SELECT ... FOR UPDATE SKIP LOCKED` and keeps the claiming
//! transaction open while the job is in flight. Rows locked by other
//! workers (or other processes) are skipped, never blocked on. Settlement
//! (`re_schedule`, `mark_failed`, `remove`) runs inside the held
//! transaction and commits it; if the process dies first, the connection
//! drops, the lock is released, and the row is re-offered — the source of
//! the at-least-once delivery guarantee.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jobq_postgres::PostgresDriver;
//! use jobq_core::{DriverConfig, QueueConfig, QueueManager};
//!
//! #[tokio::main]
//! async fn main() -> jobq_core::Result<()> {
//!     let driver =
//!         PostgresDriver::new("postgres://localhost/mydb", DriverConfig::default()).await?;
//!     let manager = QueueManager::new(driver, registry, QueueConfig::default());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobq_core::{
    current_timestamp, Driver, DriverConfig, JobId, JobRecord, QueueError, Result, StoreOptions,
};

type Lease = Transaction<'static, Postgres>;

/// PostgreSQL driver for job queue storage.
#[derive(Clone)]
pub struct PostgresDriver {
    pool: PgPool,
    config: DriverConfig,
    leases: Arc<tokio::sync::Mutex<HashMap<i64, Lease>>>,
}

impl PostgresDriver {
    /// Create a new PostgreSQL driver.
    pub async fn new(database_url: &str, config: DriverConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let driver = Self {
            pool,
            config,
            leases: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        };

        driver.init_table().await?;

        Ok(driver)
    }

    /// Initialize the job table and its availability index.
    async fn init_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                class_path TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                available_at BIGINT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                failed BOOLEAN NOT NULL DEFAULT FALSE
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

    fn to_record(row: &PgRow) -> Result<JobRecord> {
        let payload: String = row.get("payload");
        let attempts: i32 = row.get("attempts");
        Ok(JobRecord {
            id: JobId(row.get::<i64, _>("id")),
            class_path: row.get("class_path"),
            payload: serde_json::from_str(&payload)?,
            created_at: row.get("created_at"),
            available_at: row.get("available_at"),
            attempts: attempts as u32,
            failed: row.get("failed"),
        })
    }

    /// Take the held claim transaction for a row, if this process owns one.
    async fn take_lease(&self, id: JobId) -> Option<Lease> {
        self.leases.lock().await.remove(&id.0)
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn store(&self, class_path: &str, payload: &Value, options: StoreOptions) -> Result<()> {
        let now = current_timestamp();
        sqlx::query(&format!(
            "INSERT INTO {} (class_path, payload, created_at, available_at, attempts, failed) \
             VALUES ($1, $2, $3, $4, 0, FALSE)",
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to begin claim: {}", e)))?;

        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE available_at <= $1 AND failed = FALSE \
             ORDER BY available_at, id LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
            self.table()
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to fetch next job: {}", e)))?;

        let row = match row {
            Some(row) => row,
            // Nothing eligible; dropping the transaction releases it.
            None => return Ok(None),
        };

        let record = Self::to_record(&row)?;
        self.leases.lock().await.insert(record.id.0, tx);
        Ok(Some(record))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let now = current_timestamp();
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE id = $1 AND available_at <= $2 AND failed = FALSE",
            self.table()
        ))
        .bind(id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to fetch job: {}", e)))?;

        row.map(|r| Self::to_record(&r)).transpose()
    }

    async fn re_schedule(&self, job: &JobRecord, retry_after: u64) -> Result<()> {
        let available_at = current_timestamp() + retry_after as i64;
        let sql = format!(
            "UPDATE {} SET attempts = $1, available_at = $2 WHERE id = $3",
            self.table()
        );

        let affected = match self.take_lease(job.id).await {
            Some(mut tx) => {
                let result = sqlx::query(&sql)
                    .bind(job.attempts as i32)
                    .bind(available_at)
                    .bind(job.id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        QueueError::Storage(format!("Failed to re-schedule job: {}", e))
                    })?;
                tx.commit()
                    .await
                    .map_err(|e| QueueError::Storage(format!("Failed to commit claim: {}", e)))?;
                result.rows_affected()
            }
            None => sqlx::query(&sql)
                .bind(job.attempts as i32)
                .bind(available_at)
                .bind(job.id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::Storage(format!("Failed to re-schedule job: {}", e)))?
                .rows_affected(),
        };

        if affected == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(())
    }

    async fn mark_failed(&self, job: &JobRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET failed = TRUE, attempts = $1 WHERE id = $2",
            self.table()
        );

        let affected = match self.take_lease(job.id).await {
            Some(mut tx) => {
                let result = sqlx::query(&sql)
                    .bind(job.attempts as i32)
                    .bind(job.id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        QueueError::Storage(format!("Failed to mark job failed: {}", e))
                    })?;
                tx.commit()
                    .await
                    .map_err(|e| QueueError::Storage(format!("Failed to commit claim: {}", e)))?;
                result.rows_affected()
            }
            None => sqlx::query(&sql)
                .bind(job.attempts as i32)
                .bind(job.id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::Storage(format!("Failed to mark job failed: {}", e)))?
                .rows_affected(),
        };

        if affected == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table());

        match self.take_lease(id).await {
            Some(mut tx) => {
                sqlx::query(&sql)
                    .bind(id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| QueueError::Storage(format!("Failed to remove job: {}", e)))?;
                tx.commit()
                    .await
                    .map_err(|e| QueueError::Storage(format!("Failed to commit claim: {}", e)))?;
            }
            None => {
                sqlx::query(&sql)
                    .bind(id.0)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| QueueError::Storage(format!("Failed to remove job: {}", e)))?;
            }
        }
        Ok(())
    }

    async fn pending_len(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE failed = FALSE",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to count pending jobs: {}", e)))?;
        Ok(row.0 as usize)
    }

    async fn failed_len(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE failed = TRUE",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to count failed jobs: {}", e)))?;
        Ok(row.0 as usize)
    }

    async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        let rows: Vec<PgRow> = sqlx::query(&format!(
            "SELECT id, class_path, payload, created_at, available_at, attempts, failed \
             FROM {} WHERE failed = TRUE ORDER BY id DESC LIMIT $1 OFFSET $2",
            self.table()
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(format!("Failed to list failed jobs: {}", e)))?;

        rows.iter().map(Self::to_record).collect()
    }

    fn polling_delay(&self) -> Duration {
        self.config.polling_delay
    }
}
