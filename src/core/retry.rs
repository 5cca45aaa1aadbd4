//! Whole-operation retry for lost lock races.
//!
//! A unit of work that hits a MySQL deadlock or lock-wait timeout surfaces as
//! [`AppError::Conflict`]. The operation is re-run from scratch, which re-reads
//! every balance under fresh locks.

use crate::core::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const INITIAL_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF_MS: u64 = 400;

fn backoff_duration(attempt: u32) -> Duration {
    let ms = INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.min(8));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

/// Run `f` and re-run it up to `max_retries` times while it fails with a
/// retryable conflict. Any other error is returned immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    max_retries: u32,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after conflict retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_retries => {
                let backoff = backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Concurrent modification, retrying"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                if let AppError::Conflict(_) = err {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Conflict persisted after max retries"
                    );
                }
                return Err(err);
            }
        }
    }
}
