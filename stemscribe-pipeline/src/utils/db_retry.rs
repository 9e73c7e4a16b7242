//! Retry of job-store writes on SQLite lock contention
//!
//! Several workers write their job rows concurrently. SQLite serialises
//! writers, so a write may see "database is locked" and is retried with
//! exponential backoff: 10 ms doubling up to 1 s per sleep, until the total
//! wait exceeds the configured limit.

use std::time::{Duration, Instant};
use stemscribe_common::{Error, Result};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` while it fails with a database lock error
///
/// Non-lock errors are returned immediately. Once `max_wait_ms` has elapsed
/// the lock error is converted to `Error::Internal` describing the attempts.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    retry_while(operation_name, max_wait_ms, is_lock_error, operation).await
}

/// True for SQLite busy/locked errors
pub fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) => {
            let code_busy = db_err
                .code()
                .map(|c| c == "5" || c == "6" || c.starts_with("SQLITE_BUSY") || c.starts_with("SQLITE_LOCKED"))
                .unwrap_or(false);
            code_busy || db_err.message().contains("database is locked")
        }
        Error::Database(other) => other.to_string().contains("database is locked"),
        _ => false,
    }
}

async fn retry_while<F, Fut, T, P>(
    operation_name: &str,
    max_wait_ms: u64,
    is_retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

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
                            "Job store write succeeded after long lock contention"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Job store write succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Job store write gave up: database still locked"
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
                    backoff_ms,
                    remaining_ms = max_duration.saturating_sub(elapsed).as_millis(),
                    "Database locked, retrying after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        Error::Internal("locked".to_string())
    }

    fn is_locked(err: &Error) -> bool {
        matches!(err, Error::Internal(msg) if msg == "locked")
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_lock_errors() {
        let attempts = AtomicU32::new(0);

        let result = retry_while("test_op", 5000, is_locked, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(locked())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_wait() {
        let attempts = AtomicU32::new(0);

        let result = retry_while("test_op", 30, is_locked, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(locked()) }
        })
        .await;

        match result {
            Err(Error::Internal(msg)) => assert!(msg.starts_with("Database locked after")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("test_op", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::InvalidInput("bad".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_database_errors_are_not_lock_errors() {
        assert!(!is_lock_error(&Error::Internal("database is locked".to_string())));
    }
}
