//! Basic example using the SQLite in-memory driver.
//!
//! This example demonstrates:
//! - Registering a job type under its class path
//! - Enqueueing jobs through the queue manager
//! - Processing jobs with polling workers
//!
//! Run with: `cargo run -p demo-basic`

use async_trait::async_trait;
use jobq_core::{Job, JobRegistry, JobResult, QueueConfig, QueueManager};
use jobq_sqlite::SqliteDriver;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Email notification payload.
#[derive(Debug, Serialize, Deserialize)]
struct Email {
    to: String,
    subject: String,
    body: String,
}

struct SendEmail;

#[async_trait]
impl Job for SendEmail {
    type Payload = Email;

    fn class_path() -> &'static str {
        "App/Jobs/SendEmail"
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn execute(&self, payload: Email) -> JobResult {
        println!("[email] sending to: {}", payload.to);
        println!("        subject: {}", payload.subject);
        println!("        body: {}", payload.body);

        // Simulate some work
        tokio::time::sleep(Duration::from_millis(500)).await;

        println!("[email] sent\n");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> jobq_core::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("jobq basic example\n");

    // SQLite in-memory driver: no setup required.
    let driver = SqliteDriver::in_memory().await?;

    let mut registry = JobRegistry::new();
    registry.register(SendEmail);

    let manager = QueueManager::new(
        driver,
        registry,
        QueueConfig::builder()
            .workers(2)
            .shutdown_timeout(Duration::from_secs(5))
            .build(),
    );

    let emails = vec![
        Email {
            to: "alice@example.com".to_string(),
            subject: "Welcome!".to_string(),
            body: "Thanks for signing up.".to_string(),
        },
        Email {
            to: "bob@example.com".to_string(),
            subject: "Your order shipped".to_string(),
            body: "Your package is on the way.".to_string(),
        },
        Email {
            to: "charlie@example.com".to_string(),
            subject: "Password reset".to_string(),
            body: "Click here to reset your password.".to_string(),
        },
    ];

    println!("Enqueueing {} jobs...\n", emails.len());
    for email in emails {
        manager.enqueue::<SendEmail>(email).await?;
    }

    println!("Pending jobs: {}", manager.pending_len().await?);
    println!("\nStarting 2 workers...");
    println!("Press Ctrl+C to stop\n");

    manager.run().await?;

    Ok(())
}
