//! # jobq-core - Core contract and worker loop for the jobq job queue
//!
//! A persisted job queue: producers enqueue units of work (a class-path
//! reference plus a payload) into a durable store; workers poll for due
//! jobs, execute them, and handle retry/failure bookkeeping.
//!
//! This crate provides the core abstractions:
//! - [`Driver`] trait for storage implementations
//! - [`JobRecord`], [`JobId`], [`StoreOptions`] persistence types
//! - [`Job`] trait and [`JobRegistry`] for dispatch by class path
//! - [`QueueManager`] for enqueueing and running the worker pool
//! - [`MemoryDriver`] for tests and local development
//! - Error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobq_core::{Job, JobRegistry, JobResult, MemoryDriver, QueueConfig, QueueManager};
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Email {
//!     to: String,
//! }
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl Job for SendEmail {
//!     type Payload = Email;
//!
//!     fn class_path() -> &'static str {
//!         "App/Jobs/SendEmail"
//!     }
//!
//!     async fn execute(&self, payload: Email) -> JobResult {
//!         println!("sending to {}", payload.to);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> jobq_core::Result<()> {
//!     let mut registry = JobRegistry::new();
//!     registry.register(SendEmail);
//!
//!     let manager = QueueManager::new(MemoryDriver::new(), registry, QueueConfig::default());
//!     manager.enqueue::<SendEmail>(Email { to: "a@b.com".into() }).await?;
//!     manager.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod driver;
mod error;
mod job;
mod manager;
mod memory;
mod record;
mod registry;
mod retry;
mod worker;

// Re-export main types
pub use config::{DriverConfig, QueueConfig, QueueConfigBuilder, DEFAULT_POLLING_DELAY};
pub use driver::{Driver, DynDriver, SharedDriver};
pub use error::{QueueError, Result};
pub use job::{Job, JobError, JobResult};
pub use manager::QueueManager;
pub use memory::MemoryDriver;
pub use record::{current_timestamp, JobId, JobRecord, StoreOptions};
pub use registry::{ErasedJob, JobRegistry};
