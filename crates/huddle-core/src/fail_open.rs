//! Fail-open and retry utilities
//!
//! `fail_open` is for infrastructure that must never stop a conversation
//! (transcript logging, persistence). `retry_transient` is for collaborator
//! calls where only transient failures may be retried.
//!
//! DO NOT use fail-open for:
//! - Reply generation (business logic)
//! - Speaker selection (correctness)
//! - Human input (required confirmation)

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open (infrastructure, not business logic)
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use huddle_core::fail_open::fail_open;
/// use huddle_core::Result;
///
/// async fn write_transcript() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("transcript", || write_transcript()).await;
///     // result is None if write_transcript() failed, otherwise Some(())
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Retry an operation while it fails transiently
///
/// Makes at most `max_retries + 1` attempts. Fatal errors (see
/// [`HuddleError::is_transient`](crate::HuddleError::is_transient)) are
/// returned immediately. The backoff before retry `n` is `backoff * n`.
///
/// ```no_run
/// use huddle_core::fail_open::retry_transient;
/// use huddle_core::Result;
/// use std::time::Duration;
///
/// async fn call_model() -> Result<String> {
///     Ok("reply".to_string())
/// }
///
/// async fn example() -> Result<String> {
///     retry_transient("reply:coder", 3, Duration::from_millis(100), || call_model()).await
/// }
/// ```
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_retries: usize,
    backoff: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    "{} failed transiently (retry {}/{}): {}",
                    operation_name, attempt, max_retries, e
                );
                tokio::time::sleep(backoff * attempt as u32).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        "{} failed after {} retries: {}",
                        operation_name, max_retries, e
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HuddleError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, HuddleError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(HuddleError::Other("test error".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retry_transient_success_after_retry() {
        let mut attempts = 0;
        let result = retry_transient("test_op", 3, Duration::from_millis(1), || {
            attempts += 1;
            let current = attempts;
            async move {
                if current < 2 {
                    Err(HuddleError::Transient("timeout".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_transient_exhausts() {
        let mut attempts = 0;
        let result: Result<i32> = retry_transient("test_op", 2, Duration::from_millis(1), || {
            attempts += 1;
            async { Err(HuddleError::Transient("still down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(HuddleError::Transient(_))));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_transient_fatal_not_retried() {
        let mut attempts = 0;
        let result: Result<i32> = retry_transient("test_op", 5, Duration::from_millis(1), || {
            attempts += 1;
            async { Err(HuddleError::Api("bad request".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(HuddleError::Api(_))));
        assert_eq!(attempts, 1);
    }
}
