//! Exponential backoff with full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::Classify;

/// Defaults used when no configuration is supplied.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry schedule for a single logical call.
///
/// `max_retries` counts attempts after the initial one, so a policy with
/// `max_retries = 3` invokes the operation at most four times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_retries,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Upper bound of the wait before retry number `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        backoff_ceiling(self.base_delay, self.max_delay, attempt)
    }

    /// Jittered wait before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }
}

/// `min(base * 2^attempt, cap)`, saturating on overflow.
pub fn backoff_ceiling(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Uniform random delay in `[0, backoff_ceiling(base, cap, attempt)]`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let ceiling = backoff_ceiling(base, cap, attempt);
    let millis = ceiling.as_millis() as u64;
    if millis == 0 {
        return ceiling;
    }
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

/// Execute an async operation with jittered exponential backoff.
///
/// Only errors that report [`Classify::is_retryable`] are retried; anything
/// else is returned immediately. When the error carries a server-supplied
/// `retry_after`, the wait is at least that long, but never longer than
/// `max_delay`. The closure receives the 0-based attempt number.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_retries {
                    return Err(e);
                }

                let mut backoff = policy.delay(attempt);
                if let Some(after) = e.retry_after() {
                    backoff = backoff.max(after.min(policy.max_delay));
                }

                tracing::warn!(
                    target_name = name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
        Throttled(Duration),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Classify for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                TestError::Throttled(d) => Some(*d),
                _ => None,
            }
        }
    }

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_ceiling(base, cap, 0), Duration::from_secs(1));
        assert_eq!(backoff_ceiling(base, cap, 1), Duration::from_secs(2));
        assert_eq!(backoff_ceiling(base, cap, 4), Duration::from_secs(16));
        assert_eq!(backoff_ceiling(base, cap, 5), cap);
        assert_eq!(backoff_ceiling(base, cap, 200), cap);
    }

    #[test]
    fn test_ceiling_is_monotonic() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let c = policy.ceiling(attempt);
            assert!(c >= prev);
            assert!(c <= policy.max_delay);
            prev = c;
        }
    }

    #[test]
    fn test_delay_within_bounds() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 5);
        for attempt in 0..10 {
            for _ in 0..50 {
                assert!(policy.delay(attempt) <= policy.ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_cap_never_below_base() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(1), 1);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3);

        let result = with_retry(&policy, "test", |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "test", |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = with_retry(&RetryPolicy::none(), "test", |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_secs(30), 1);
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = with_retry(&policy, "test", |attempt| async move {
            if attempt == 0 {
                Err(TestError::Throttled(Duration::from_secs(7)))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_clamped_to_max_delay() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(30), 1);
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = with_retry(&policy, "test", |attempt| async move {
            if attempt == 0 {
                Err(TestError::Throttled(Duration::from_secs(86_400)))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() <= Duration::from_secs(31));
    }
}
