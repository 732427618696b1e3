//! Redis driver example with delayed jobs and the retry mechanism.
//!
//! This example demonstrates:
//! - Using Redis as the queue store
//! - Delayed dispatch via `enqueue_in`
//! - Retry with per-job backoff when a job fails
//! - Graceful shutdown
//!
//! Prerequisites:
//! - Redis server running on localhost:6379
//!
//! Run with: `cargo run -p demo-redis`

use async_trait::async_trait;
use jobq_core::{DriverConfig, Job, JobError, JobRegistry, JobResult, QueueConfig, QueueManager};
use jobq_redis::RedisDriver;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Payment processing payload.
#[derive(Debug, Serialize, Deserialize)]
struct Payment {
    order_id: String,
    amount: f64,
    currency: String,
}

struct ProcessPayment;

#[async_trait]
impl Job for ProcessPayment {
    type Payload = Payment;

    fn class_path() -> &'static str {
        "App/Jobs/ProcessPayment"
    }

    async fn execute(&self, payload: Payment) -> JobResult {
        println!(
            "[payment] order={} amount={:.2} {}",
            payload.order_id,
            payload.amount,
            payload.currency.to_uppercase()
        );

        tokio::time::sleep(Duration::from_millis(800)).await;

        println!("[payment] done\n");
        Ok(())
    }
}

/// Webhook notification payload.
#[derive(Debug, Serialize, Deserialize)]
struct Webhook {
    url: String,
    body: String,
    /// For demo: fail this many attempts to show retry.
    fail_count: u32,
}

// Track webhook attempts for demo purposes
static WEBHOOK_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

struct SendWebhook;

#[async_trait]
impl Job for SendWebhook {
    type Payload = Webhook;

    fn class_path() -> &'static str {
        "App/Jobs/SendWebhook"
    }

    fn retries(&self) -> u32 {
        5
    }

    fn retry_after(&self, _attempt: u32) -> u64 {
        3
    }

    async fn execute(&self, payload: Webhook) -> JobResult {
        let attempt = WEBHOOK_ATTEMPTS.fetch_add(1, Ordering::SeqCst) + 1;

        println!("[webhook] attempt={} url={}", attempt, payload.url);

        tokio::time::sleep(Duration::from_millis(300)).await;

        if attempt <= payload.fail_count {
            println!("[webhook] failed, will retry\n");
            return Err(JobError::retryable("Connection timeout"));
        }

        println!("[webhook] delivered\n");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> jobq_core::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("jobq Redis example\n");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string());

    println!("Connecting to {}...", redis_url);

    let config = DriverConfig::new()
        .key_prefix("jobq-demo")
        .polling_delay(Duration::from_millis(500));

    let driver = match RedisDriver::new(&redis_url, config).await {
        Ok(d) => d.visibility_timeout(Duration::from_secs(30)),
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            eprintln!("Make sure Redis is running: docker run -d -p 6379:6379 redis");
            return Err(e);
        }
    };

    println!("Connected\n");

    let mut registry = JobRegistry::new();
    registry.register(ProcessPayment);
    registry.register(SendWebhook);

    let manager = QueueManager::new(
        driver,
        registry,
        QueueConfig::builder()
            .workers(2)
            .shutdown_timeout(Duration::from_secs(5))
            .build(),
    );

    // Demo 1: immediate jobs
    println!("--- Demo 1: Immediate Payment Jobs ---\n");

    manager
        .enqueue::<ProcessPayment>(Payment {
            order_id: "ORD-001".to_string(),
            amount: 99.99,
            currency: "usd".to_string(),
        })
        .await?;
    manager
        .enqueue::<ProcessPayment>(Payment {
            order_id: "ORD-002".to_string(),
            amount: 149.50,
            currency: "eur".to_string(),
        })
        .await?;

    // Demo 2: delayed jobs
    println!("--- Demo 2: Delayed Job (5s) ---\n");

    manager
        .enqueue_in::<ProcessPayment>(
            Payment {
                order_id: "ORD-DELAYED".to_string(),
                amount: 299.00,
                currency: "usd".to_string(),
            },
            Duration::from_secs(5),
        )
        .await?;

    // Demo 3: retry mechanism
    println!("--- Demo 3: Retry (fails 2x then succeeds) ---\n");

    manager
        .enqueue::<SendWebhook>(Webhook {
            url: "https://api.example.com/webhook".to_string(),
            body: r#"{"event": "order.completed"}"#.to_string(),
            fail_count: 2,
        })
        .await?;

    println!("Pending jobs: {}", manager.pending_len().await?);
    println!("\nStarting 2 workers, press Ctrl+C to stop\n");

    manager.run().await?;

    println!("\nDone");
    Ok(())
}
