//! Bounded retry for store races.

use crate::error::AppError;
use crate::repository::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct StoreRetry {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl StoreRetry {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Runs `f` again while it fails with [`StoreError::Conflict`].
    ///
    /// Any other error is returned at once. When every attempt conflicts the
    /// caller gets [`AppError::Unavailable`] and may retry the whole request.
    pub async fn run<F, Fut, T>(&self, operation: &'static str, mut f: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Conflict(reason)) => {
                    if attempt >= self.max_attempts {
                        warn!(operation, attempts = attempt, %reason, "store retries exhausted");
                        return Err(AppError::Unavailable(format!(
                            "{operation} kept conflicting, retry later"
                        )));
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        %reason,
                        "store conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> StoreRetry {
        StoreRetry {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn first_success_returns_immediately() {
        let value = tokio_test::block_on(fast(1).run("op", || async { Ok::<_, StoreError>(7) }));
        tokio_test::assert_ok!(&value);
        assert_eq!(value, Ok(7));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(StoreRetry::with_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn conflict_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast(3)
            .run("op", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(StoreError::Conflict("race".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_conflicts_become_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast(3)
            .run("op", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Conflict("race".into())) }
            })
            .await;
        assert!(matches!(result, Err(AppError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast(5)
            .run("op", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Backend("syntax".into())) }
            })
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
