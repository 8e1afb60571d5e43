//! Bounded retry for operations that may transiently fail.
//!
//! The cluster facade never retries on its own; callers that need eventual
//! success (management-plane `get`, SQL connect, teardown `delete`) wrap
//! the call here. Fixed interval, fixed overall budget, and a
//! distinguishable timeout error -- no loop in the harness runs unbounded.

use std::fmt;
use std::time::Duration;

/// A bounded wait exceeded its deadline.
#[derive(Debug)]
pub struct TimeoutError {
    pub operation: String,
    pub deadline: Duration,
    pub last_error: Option<String>,
}

impl TimeoutError {
    pub fn new(operation: impl Into<String>, deadline: Duration) -> Self {
        Self {
            operation: operation.into(),
            deadline,
            last_error: None,
        }
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} did not succeed within {:?}",
            self.operation, self.deadline
        )?;
        if let Some(last) = &self.last_error {
            write!(f, " (last error: {last})")?;
        }
        Ok(())
    }
}

impl std::error::Error for TimeoutError {}

/// Retry `op` at a fixed interval until it succeeds or `deadline` elapses.
///
/// The deadline bounds the whole loop, including an in-flight attempt; on
/// expiry the last observed error is carried in the [`TimeoutError`].
pub async fn with_deadline<T, E, F, Fut>(
    operation: &str,
    interval: Duration,
    deadline: Duration,
    mut op: F,
) -> Result<T, TimeoutError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error: Option<String> = None;

    let result = tokio::time::timeout(deadline, {
        let last_error = &mut last_error;
        async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match op().await {
                    Ok(value) => {
                        if attempt > 1 {
                            tracing::debug!(operation, attempt, "succeeded after retries");
                        }
                        return value;
                    }
                    Err(e) => {
                        tracing::debug!(operation, attempt, error = %e, "attempt failed, will retry");
                        *last_error = Some(e.to_string());
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
    })
    .await;

    match result {
        Ok(value) => Ok(value),
        Err(_elapsed) => Err(TimeoutError {
            operation: operation.to_string(),
            deadline,
            last_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_deadline("noop", Duration::from_millis(10), Duration::from_secs(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, std::io::Error>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let result = with_deadline(
            "flaky",
            Duration::from_millis(10),
            Duration::from_secs(5),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(std::io::Error::other("not yet"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_and_preserves_last_error() {
        let deadline = Duration::from_millis(100);
        let start = std::time::Instant::now();
        let result: Result<(), _> = with_deadline(
            "always failing op",
            Duration::from_millis(10),
            deadline,
            || async { Err::<(), _>(std::io::Error::other("boom")) },
        )
        .await;

        let err = result.unwrap_err();
        assert!(start.elapsed() >= deadline);
        assert_eq!(err.operation, "always failing op");
        assert_eq!(err.last_error.as_deref(), Some("boom"));
        assert!(err.to_string().contains("boom"), "display: {err}");
    }
}
