//! Classification-aware retry around remote exchange calls.
//!
//! Every outbound call goes through [`RetryExecutor::execute`]: a shared rate
//! limiter spaces attempts out, each attempt is bounded by a wall-clock
//! timeout, and failures are classified to decide between immediate rejection
//! and exponential backoff with jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use thiserror::Error;

use super::classify::{classify, ErrorKind};

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Retry behavior knobs. Defaults mirror production settings: 3 retries,
/// 1 s base delay doubling per attempt, capped at 60 s, 10% jitter, 10 s
/// extra for rate limits, 30 s per-attempt timeout, 100 ms between calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub rate_limit_delay: Duration,
    pub attempt_timeout: Duration,
    pub min_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            rate_limit_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
            min_interval: Duration::from_millis(100),
        }
    }
}

/// Failure of a retried call, tagged with its classification
#[derive(Debug, Error)]
pub enum CallError {
    /// Permanent or authentication failure; the call was not retried
    #[error("{kind} failure in {operation}: {message}")]
    Rejected {
        operation: String,
        kind: ErrorKind,
        message: String,
    },

    /// Retryable failures outlasted the retry budget
    #[error("retries exhausted after {attempts} attempts in {operation}: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        kind: ErrorKind,
        last_error: String,
    },
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Rejected { kind, .. } => *kind,
            CallError::RetriesExhausted { kind, .. } => *kind,
        }
    }
}

/// Wraps remote operations with rate limiting, timeout and backoff.
///
/// Cloneable; all clones share one rate limiter so the inter-call interval
/// holds across the whole process.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    limiter: Arc<DirectRateLimiter>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        let interval = policy.min_interval.max(Duration::from_millis(1));
        let quota = Quota::with_period(interval).expect("non-zero rate limit interval");
        Self {
            policy,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Run `op`, retrying retryable failures up to `max_retries` times.
    ///
    /// Never sleeps before the first attempt. An attempt exceeding the
    /// timeout counts as a Network failure. Once an attempt's timeout window
    /// has started the attempt is not aborted; the boundary between attempts
    /// is the only cancellation point.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_retries = self.policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            // Global inter-call spacing, independent of retry state
            self.limiter.until_ready().await;

            let (kind, message) =
                match tokio::time::timeout(self.policy.attempt_timeout, op()).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(err)) => {
                        let message = format!("{err:#}");
                        (classify(&message), message)
                    }
                    Err(_) => (
                        ErrorKind::Network,
                        format!(
                            "attempt timed out after {:.0}s",
                            self.policy.attempt_timeout.as_secs_f64()
                        ),
                    ),
                };

            if !kind.is_retryable() {
                tracing::error!("{} error in {}, not retrying: {}", kind, operation, message);
                return Err(CallError::Rejected {
                    operation: operation.to_string(),
                    kind,
                    message,
                });
            }

            if attempt >= max_retries {
                tracing::error!(
                    "Max retries ({}) exceeded for {}: {}",
                    max_retries,
                    operation,
                    message
                );
                return Err(CallError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    kind,
                    last_error: message,
                });
            }

            let delay = self.backoff_delay(attempt, kind);
            tracing::warn!(
                "Attempt {}/{} failed for {} ({}): {}. Retrying in {:.2}s",
                attempt + 1,
                max_retries + 1,
                operation,
                kind,
                message,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// `min(max_delay, (base + rate_limit_extra) * multiplier^attempt)` plus
    /// uniform jitter in `[0, delay * jitter_factor)`.
    fn backoff_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let mut base = self.policy.base_delay.as_secs_f64();
        if kind == ErrorKind::RateLimit {
            base += self.policy.rate_limit_delay.as_secs_f64();
        }

        let capped = (base * self.policy.multiplier.powi(attempt as i32))
            .min(self.policy.max_delay.as_secs_f64());
        let jitter = capped * self.policy.jitter_factor * rand::random::<f64>();

        Duration::from_secs_f64(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.0,
            rate_limit_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(200),
            min_interval: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result = executor
            .execute("get_price", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(42u64)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_sleep_before_first_attempt() {
        // A large base delay must not affect a call that succeeds immediately
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(30),
            min_interval: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let executor = RetryExecutor::new(policy);

        let start = Instant::now();
        let result: Result<(), _> = executor.execute("noop", || async { Ok(()) }).await;
        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result: Result<(), _> = executor
            .execute("place_order", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("order rejected: insufficient_funds"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, CallError::Rejected { .. }));
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result: Result<(), _> = executor
            .execute("get_account", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("auth failed"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retried_until_success() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result = executor
            .execute("get_candles", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("internal server error"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_carries_attempt_count() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result: Result<(), _> = executor
            .execute("health_check", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("connection reset by peer"))
                }
            })
            .await;

        match result.unwrap_err() {
            CallError::RetriesExhausted {
                attempts,
                kind,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3); // initial attempt + 2 retries
                assert_eq!(kind, ErrorKind::Network);
                assert!(last_error.contains("connection reset"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_classified_as_network() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(10),
            ..fast_policy(0)
        };
        let executor = RetryExecutor::new(policy);

        let result: Result<(), _> = executor
            .execute("slow_call", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(matches!(err, CallError::RetriesExhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_backoff_delays_non_decreasing_up_to_cap() {
        let executor = RetryExecutor::new(RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        });

        let mut previous = Duration::ZERO;
        for attempt in 0..10 {
            let delay = executor.backoff_delay(attempt, ErrorKind::Transient);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
        // 1, 2, 4, ... capped at 60
        assert_eq!(executor.backoff_delay(0, ErrorKind::Transient), Duration::from_secs(1));
        assert_eq!(executor.backoff_delay(2, ErrorKind::Transient), Duration::from_secs(4));
        assert_eq!(executor.backoff_delay(9, ErrorKind::Transient), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limit_gets_extra_delay() {
        let executor = RetryExecutor::new(RetryPolicy {
            base_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        });

        assert_eq!(
            executor.backoff_delay(0, ErrorKind::RateLimit),
            Duration::from_secs(11)
        );
        assert_eq!(
            executor.backoff_delay(0, ErrorKind::Transient),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let executor = RetryExecutor::new(RetryPolicy {
            base_delay: Duration::from_secs(2),
            jitter_factor: 0.1,
            ..RetryPolicy::default()
        });

        for _ in 0..100 {
            let delay = executor.backoff_delay(0, ErrorKind::Transient).as_secs_f64();
            assert!((2.0..2.2).contains(&delay));
        }
    }
}
