use gradesync_core::{RetryConfig, Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Fixed escalating backoff for store calls.
///
/// One attempt per schedule entry, each preceded by its delay. Only
/// transient failures are retried; anything else is returned at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.delays())
    }

    /// `attempts` tries with no sleeping in between.
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts])
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for (attempt, delay) in self.delays.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind().is_retryable() => {
                    match self.delays.get(attempt + 1) {
                        Some(next) => warn!(
                            "{} failed (attempt {}/{}): {}; retrying in {:?}",
                            what,
                            attempt + 1,
                            self.attempts(),
                            e,
                            next
                        ),
                        None => warn!(
                            "{} failed (attempt {}/{}): {}; giving up",
                            what,
                            attempt + 1,
                            self.attempts(),
                            e
                        ),
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("{} failed (no retry): {}", what, e);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::InvalidOperation(format!("{what}: retry schedule is empty"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradesync_core::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing(status: u16, failures: usize, calls: &AtomicUsize) -> Result<&'static str> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(SyncError::http(status, "https://store.test/t", "boom"))
        } else {
            Ok("done")
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(4);
        let out = policy
            .run("create", move || async move { failing(503, 3, calls) })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausting_the_schedule_returns_the_last_error() {
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(4);
        let err = policy
            .run("create", move || async move { failing(429, 10, calls) })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        for status in [400, 401, 404, 422] {
            let calls = &AtomicUsize::new(0);
            let err = RetryPolicy::immediate(4)
                .run("create", move || async move { failing(status, 10, calls) })
                .await
                .unwrap_err();
            assert_ne!(err.kind(), ErrorKind::Transient);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_schedule_waits_one_two_four_seconds() {
        let calls = &AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let _ = RetryPolicy::default()
            .run("delete", move || async move { failing(500, 10, calls) })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
    }
}
