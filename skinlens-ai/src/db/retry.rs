//! Retry with exponential backoff for transient SQLite lock errors

use super::records::StoreError;
use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` while it fails with "database is locked", for at most `max_wait`
///
/// Any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait: Duration,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_locked() => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked, giving up"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }
}
