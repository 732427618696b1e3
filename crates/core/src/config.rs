//! Configuration types for the job queue library.

use std::time::Duration;

/// Idle-poll delay used when a driver does not override it.
pub const DEFAULT_POLLING_DELAY: Duration = Duration::from_millis(2000);

/// Configuration shared by driver implementations.
///
/// Relational drivers read `table_name`; the Redis driver reads
/// `key_prefix`; all drivers report `polling_delay` back to the manager.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long workers sleep when no job is due.
    pub polling_delay: Duration,
    /// Name of the job table (relational backends).
    pub table_name: String,
    /// Namespace prefix for keys (key-value backends).
    pub key_prefix: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            polling_delay: DEFAULT_POLLING_DELAY,
            table_name: "jobq_jobs".to_string(),
            key_prefix: "jobq".to_string(),
        }
    }
}

impl DriverConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle-poll delay.
    pub fn polling_delay(mut self, delay: Duration) -> Self {
        self.polling_delay = delay;
        self
    }

    /// Set the job table name.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Set the key namespace prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Configuration for the QueueManager's worker pool.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks to spawn.
    pub workers: usize,
    /// Graceful shutdown timeout.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create a new builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }
}

/// Builder for QueueConfig.
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    pub fn workers(mut self, num: usize) -> Self {
        self.config.workers = num;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the QueueConfig.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_config_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.polling_delay, Duration::from_millis(2000));
        assert_eq!(config.table_name, "jobq_jobs");
        assert_eq!(config.key_prefix, "jobq");
    }

    #[test]
    fn test_driver_config_chaining() {
        let config = DriverConfig::new()
            .polling_delay(Duration::from_millis(50))
            .table_name("app_jobs")
            .key_prefix("app");

        assert_eq!(config.polling_delay, Duration::from_millis(50));
        assert_eq!(config.table_name, "app_jobs");
        assert_eq!(config.key_prefix, "app");
    }

    #[test]
    fn test_queue_config_builder() {
        let config = QueueConfig::builder()
            .workers(8)
            .shutdown_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.workers, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }
}
