use std::future::Future;
use std::time::Duration;

/// How many times to run an operation and how long to wait before the first retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }
}

/// Run `operation` up to `max_attempts` times, doubling the pause between attempts.
///
/// Returns the first success, or the error from the last attempt. A
/// `max_attempts` of zero still runs the operation once.
pub async fn with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    initial_backoff: Duration,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_backoff_if(max_attempts, initial_backoff, operation, |_| true).await
}

/// Like [`with_backoff`], but gives up at once on errors `should_retry` rejects
pub async fn with_backoff_if<T, E, F, Fut, P>(
    max_attempts: u32,
    initial_backoff: Duration,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = max_attempts.max(1);
    let mut backoff = initial_backoff;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts || !should_retry(&err) => return Err(err),
            Err(_) => {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = with_backoff(3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("Success") }
        })
        .await;

        assert_eq!(result, Ok("Success"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = with_backoff(3, Duration::from_millis(10), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err("temporary error")
                } else {
                    Ok("Success")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("Success"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff(3, Duration::from_millis(10), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {}", attempt)) }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let start = Instant::now();
        let _: Result<(), &str> = with_backoff(4, Duration::from_millis(100), || async { Err("nope") }).await;

        // 100 + 200 + 400 ms of sleeping, none after the final attempt
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(800), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = with_backoff(0, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_backoff_if(
            5,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permission denied") }
            },
            |err| !err.contains("permission"),
        )
        .await;

        assert_eq!(result, Err("permission denied"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
