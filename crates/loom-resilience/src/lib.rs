//! Resilience primitives shared by tool-server connections and LLM providers.
//!
//! Two orthogonal pieces:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CircuitBreaker                                             │
//! │  - decides whether to attempt a call family at all          │
//! │  - Closed → Open → HalfOpen (one trial) → Closed/Open       │
//! └─────────────────────────────────────────────────────────────┘
//!                           │ permit
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RetryPolicy                                                │
//! │  - retries within one logical call                          │
//! │  - exponential backoff clamped to a cap, full jitter        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`execute`] composes them: the breaker is consulted once, the retry loop
//! runs inside the permit, and an exhausted retry loop counts as a single
//! breaker failure.

pub mod breaker;
pub mod error;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerPermit, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use error::{CircuitOpen, Classify, ResilienceError};
pub use retry::{RetryPolicy, backoff_ceiling, backoff_delay, with_retry};

use std::future::Future;

/// Run `f` through `breaker` and `policy`.
///
/// The breaker is asked for a permit once. If granted, `f` is retried
/// according to `policy`; the final outcome is reported to the breaker as a
/// single success or failure. Errors that do not [count as
/// failures](Classify::counts_as_failure) (the remote answered, just
/// unfavourably) are reported as successes.
pub async fn execute<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    f: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let permit = breaker.try_acquire()?;

    match with_retry(policy, breaker.name(), f).await {
        Ok(value) => {
            permit.succeed();
            Ok(value)
        }
        Err(e) => {
            if e.counts_as_failure() {
                permit.fail();
            } else {
                permit.succeed();
            }
            Err(ResilienceError::Inner(e))
        }
    }
}
