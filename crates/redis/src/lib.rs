//! Redis driver for the jobq job queue.
//!
//! Key-value rendition of the driver contract. Rows live as JSON strings
//! under per-job keys; eligibility ordering comes from a pending ZSET
//! scored by `available_at`. Redis has no row locks, so the in-flight
//! claim is a lease: claiming moves the id to an in-flight ZSET scored by
//! lease expiry (the visibility timeout), and leases whose holder died are
//! reclaimed lazily before each poll — the key-value source of the
//! at-least-once delivery guarantee.
//!
//! Claim plus reclaim run as one Lua script, which makes the read and the
//! lease acquisition a single atomic step relative to concurrent pollers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jobq_redis::RedisDriver;
//! use jobq_core::{DriverConfig, QueueConfig, QueueManager};
//!
//! #[tokio::main]
//! async fn main() -> jobq_core::Result<()> {
//!     let driver = RedisDriver::new("redis://localhost", DriverConfig::default()).await?;
//!     let manager = QueueManager::new(driver, registry, QueueConfig::default());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;

use jobq_core::{
    current_timestamp, Driver, DriverConfig, JobId, JobRecord, QueueError, Result, StoreOptions,
};

/// Reclaims expired leases, then claims the oldest due pending entry.
///
/// KEYS[1] = pending ZSET, KEYS[2] = in-flight ZSET
/// ARGV[1] = now, ARGV[2] = lease expiry for the new claim
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, member in ipairs(expired) do
    redis.call('ZREM', KEYS[2], member)
    redis.call('ZADD', KEYS[1], ARGV[1], member)
end
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
    return false
end
local member = due[1]
redis.call('ZREM', KEYS[1], member)
redis.call('ZADD', KEYS[2], ARGV[2], member)
return member
"#;

/// Manages Redis keys under a configurable namespace prefix.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new RedisKeys instance with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Get the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for the id sequence counter (STRING).
    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    /// Key for one job row (STRING holding JSON).
    pub fn job(&self, id: JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Key for the pending set (ZSET scored by `available_at`).
    pub fn pending(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    /// Key for the in-flight set (ZSET scored by lease expiry).
    pub fn inflight(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    /// Key for the failed-job list (LIST of ids, newest first).
    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    /// ZSET member for a job id, zero-padded so that equal-score members
    /// sort by id ascending.
    pub fn member(&self, id: JobId) -> String {
        format!("{:016}", id.0)
    }
}

/// Parse a ZSET member back to a JobId.
fn member_id(member: &str) -> Result<JobId> {
    member
        .parse::<i64>()
        .map(JobId)
        .map_err(|e| QueueError::Storage(format!("Malformed queue member {:?}: {}", member, e)))
}

/// Redis driver for job queue storage.
#[derive(Clone)]
pub struct RedisDriver {
    conn: ConnectionManager,
    keys: RedisKeys,
    config: DriverConfig,
    visibility_timeout: Duration,
    claim_script: redis::Script,
}

impl RedisDriver {
    /// Create a new Redis driver.
    pub async fn new(redis_url: &str, config: DriverConfig) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Storage(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(Self::with_connection(conn, config))
    }

    /// Create a new Redis driver with an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, config: DriverConfig) -> Self {
        let keys = RedisKeys::new(config.key_prefix.clone());
        Self {
            conn,
            keys,
            config,
            visibility_timeout: Duration::from_secs(60),
            claim_script: redis::Script::new(CLAIM_SCRIPT),
        }
    }

    /// Set how long a claim stays exclusive before the row is re-offered.
    ///
    /// Must comfortably exceed the longest expected job execution, or a
    /// slow job will be delivered twice.
    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Get the Redis keys manager.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn load(&self, id: JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(self.keys.job(id))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        json.map(|j| serde_json::from_str(&j).map_err(QueueError::from))
            .transpose()
    }

    fn save(&self, record: &JobRecord) -> Result<String> {
        serde_json::to_string(record).map_err(QueueError::from)
    }
}

#[async_trait]
impl Driver for RedisDriver {
    async fn store(&self, class_path: &str, payload: &Value, options: StoreOptions) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = current_timestamp();

        let id: i64 = conn
            .incr(self.keys.seq(), 1)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let record = JobRecord {
            id: JobId(id),
            class_path: class_path.to_string(),
            payload: payload.clone(),
            created_at: now,
            available_at: options.available_at.unwrap_or(now),
            attempts: 0,
            failed: false,
        };
        let json = self.save(&record)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(record.id), json)
            .zadd(
                self.keys.pending(),
                self.keys.member(record.id),
                record.available_at,
            );
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_next(&self) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let now = current_timestamp();
        let lease_until = now + self.visibility_timeout.as_secs() as i64;

        let member: Option<String> = self
            .claim_script
            .key(self.keys.pending())
            .key(self.keys.inflight())
            .arg(now)
            .arg(lease_until)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let member = match member {
            Some(member) => member,
            None => return Ok(None),
        };
        let id = member_id(&member)?;

        match self.load(id).await? {
            Some(record) => Ok(Some(record)),
            None => {
                // Row deleted while queued; drop the dangling lease.
                conn.zrem::<_, _, ()>(self.keys.inflight(), member)
                    .await
                    .map_err(|e| QueueError::Storage(e.to_string()))?;
                Ok(None)
            }
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let now = current_timestamp();
        Ok(self.load(id).await?.filter(|r| r.is_eligible(now)))
    }

    async fn re_schedule(&self, job: &JobRecord, retry_after: u64) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut record = self.load(job.id).await?.ok_or(QueueError::NotFound(job.id))?;
        record.attempts = job.attempts;
        record.available_at = current_timestamp() + retry_after as i64;
        let json = self.save(&record)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(record.id), json)
            .zrem(self.keys.inflight(), self.keys.member(record.id))
            .zadd(
                self.keys.pending(),
                self.keys.member(record.id),
                record.available_at,
            );
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(&self, job: &JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut record = self.load(job.id).await?.ok_or(QueueError::NotFound(job.id))?;
        record.attempts = job.attempts;
        record.failed = true;
        let json = self.save(&record)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(record.id), json)
            .zrem(self.keys.pending(), self.keys.member(record.id))
            .zrem(self.keys.inflight(), self.keys.member(record.id))
            .lpush(self.keys.failed(), self.keys.member(record.id));
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.keys.job(id))
            .zrem(self.keys.pending(), self.keys.member(id))
            .zrem(self.keys.inflight(), self.keys.member(id))
            .lrem(self.keys.failed(), 0, self.keys.member(id));
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn pending_len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let (pending, inflight): (usize, usize) = redis::pipe()
            .zcard(self.keys.pending())
            .zcard(self.keys.inflight())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(pending + inflight)
    }

    async fn failed_len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(self.keys.failed())
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(len)
    }

    async fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .lrange(
                self.keys.failed(),
                offset as isize,
                (offset + limit - 1) as isize,
            )
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(members.len());
        for member in members {
            if let Some(record) = self.load(member_id(&member)?).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn polling_delay(&self) -> Duration {
        self.config.polling_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_keys() {
        let keys = RedisKeys::new("jobq");
        assert_eq!(keys.seq(), "jobq:seq");
        assert_eq!(keys.pending(), "jobq:pending");
        assert_eq!(keys.inflight(), "jobq:inflight");
        assert_eq!(keys.failed(), "jobq:failed");
        assert_eq!(keys.job(JobId(7)), "jobq:job:7");
    }

    #[test]
    fn test_redis_keys_custom_prefix() {
        let keys = RedisKeys::new("myapp:queue");
        assert_eq!(keys.prefix(), "myapp:queue");
        assert_eq!(keys.pending(), "myapp:queue:pending");
    }

    #[test]
    fn test_member_zero_padding_orders_numerically() {
        let keys = RedisKeys::new("jobq");
        let nine = keys.member(JobId(9));
        let ten = keys.member(JobId(10));
        assert_eq!(nine.len(), 16);
        // Lexicographic member order must match numeric id order for
        // equal-score tie breaking.
        assert!(nine < ten);
    }

    #[test]
    fn test_member_round_trip() {
        let keys = RedisKeys::new("jobq");
        let member = keys.member(JobId(123_456));
        assert_eq!(member_id(&member).unwrap(), JobId(123_456));
    }

    #[test]
    fn test_member_id_rejects_garbage() {
        assert!(member_id("not-a-number").is_err());
    }
}
