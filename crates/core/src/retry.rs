//! Bounded-backoff retry for driver bookkeeping calls.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(100);

/// Run a driver call, retrying transient storage errors with bounded
/// exponential backoff.
///
/// Only the driver call is retried, never job execution itself; logical
/// errors (not found, resolution, serialization) fail on the first attempt.
pub(crate) async fn with_backoff<T, F, Fut>(op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    let mut delay = BASE_DELAY;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    op = op,
                    attempt = attempt,
                    error = %e,
                    "Storage call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}
