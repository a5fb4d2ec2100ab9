//! Database retry logic
//!
//! Exponential backoff for transient SQLite lock errors. The total wait is
//! bounded by the `db_max_lock_wait_ms` setting.

use dd_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::{Duration, Instant};

/// Settings key bounding lock retries
pub const MAX_LOCK_WAIT_KEY: &str = "db_max_lock_wait_ms";

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Read the lock-wait bound from settings (default 5000 ms)
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let value: Option<i64> =
        sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM settings WHERE key = ?")
            .bind(MAX_LOCK_WAIT_KEY)
            .fetch_optional(pool)
            .await?;

    Ok(value
        .filter(|ms| *ms > 0)
        .map(|ms| ms as u64)
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Retry a database operation with exponential backoff until `max_wait_ms` elapses.
///
/// Backoff starts at 10 ms, doubles per attempt and is capped at 1000 ms.
/// Errors other than "database is locked" are returned immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) if err.is_lock_error() => {
                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(err) => return Err(err),
        }
    }
}
