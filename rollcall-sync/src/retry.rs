//! Retry/backoff controller for backend calls.
//!
//! Attempt *i* (0-indexed) that fails with a retryable error waits
//! `base · 2^i` plus uniform jitter in `[0, max_jitter]` before attempt
//! *i + 1*. There is no wait after the final attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use rollcall_core::config::RetryConfig;

use crate::backend::{BackendError, ErrorKind};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following 0-indexed `attempt`, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay_for(attempt) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` calls have been made.
    ///
    /// Non-retryable errors surface as [`SyncError::Backend`] unchanged; running
    /// out of attempts yields [`SyncError::RetriesExhausted`].
    pub async fn run<T, F, Fut, R>(
        &self,
        backend: &str,
        operation: &str,
        is_retryable: R,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
        R: Fn(&BackendError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(SyncError::Backend {
                    backend: backend.to_string(),
                    operation: operation.to_string(),
                    source: err,
                });
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(SyncError::RetriesExhausted {
                    operation: format!("{backend}: {operation}"),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::debug!(
                backend,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Retry predicate: errors that clear up once a new resource propagates.
pub fn propagation(err: &BackendError) -> bool {
    matches!(err.kind, ErrorKind::NotFound | ErrorKind::RateLimited)
}

/// Retry predicate: throttling only.
pub fn throttled(err: &BackendError) -> bool {
    err.kind == ErrorKind::RateLimited
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("b", "apply policy", propagation, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::not_found("group not visible yet"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(SyncError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_message_names_attempt_count() {
        let err = policy(3)
            .run("b", "add x", propagation, || async {
                Err::<(), _>(BackendError::rate_limited("slow down"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_returned_after_one_call() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("b", "add x", throttled, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::not_found("no such user"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(SyncError::Backend { source, .. }) => assert!(source.is(ErrorKind::NotFound)),
            other => panic!("expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = policy(5)
            .run("b", "apply policy", propagation, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(BackendError::not_found("propagating"))
                } else {
                    Ok(n)
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_skips_final_sleep() {
        let start = Instant::now();
        let _ = policy(4)
            .run("b", "op", propagation, || async {
                Err::<(), _>(BackendError::not_found("x"))
            })
            .await;
        let elapsed = start.elapsed();

        // Sleeps after attempts 0, 1, 2: 1s + 2s + 4s, plus up to 3 × 500ms jitter.
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(8_500), "{elapsed:?}");
    }

    #[test]
    fn base_delay_saturates_instead_of_overflowing() {
        let p = policy(5);
        assert_eq!(p.base_delay_for(0), Duration::from_secs(1));
        assert_eq!(p.base_delay_for(3), Duration::from_secs(8));
        assert!(p.base_delay_for(64) >= Duration::from_secs(1 << 20));
    }

    #[rstest]
    #[case(BackendError::not_found("x"), true, false)]
    #[case(BackendError::rate_limited("x"), true, true)]
    #[case(BackendError::conflict("x"), false, false)]
    #[case(BackendError::fatal("x"), false, false)]
    fn predicates_classify_by_kind(
        #[case] err: BackendError,
        #[case] on_propagation: bool,
        #[case] on_throttle: bool,
    ) {
        assert_eq!(propagation(&err), on_propagation);
        assert_eq!(throttled(&err), on_throttle);
    }
}
