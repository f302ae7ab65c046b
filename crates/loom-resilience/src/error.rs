//! Error classification and the wrapper error returned by [`crate::execute`].

use std::time::Duration;

use thiserror::Error;

/// How a failure should be treated by the retry loop and the breaker.
pub trait Classify {
    /// Transient failures that are worth attempting again.
    fn is_retryable(&self) -> bool;

    /// Server-supplied minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Whether the failure says something about the health of the remote.
    ///
    /// A remote that answered with a well-formed error is healthy; those
    /// errors return `false` so they do not push the breaker toward Open.
    fn counts_as_failure(&self) -> bool {
        true
    }
}

/// A breaker refused to let a call through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for {name}, retry in {}s", retry_in.as_secs())]
pub struct CircuitOpen {
    pub name: String,
    pub retry_in: Duration,
}

impl<E> From<CircuitOpen> for ResilienceError<E> {
    fn from(open: CircuitOpen) -> Self {
        Self::CircuitOpen {
            name: open.name,
            retry_in: open.retry_in,
        }
    }
}

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker refused the call without attempting it.
    #[error("circuit open for {name}, retry in {}s", retry_in.as_secs())]
    CircuitOpen { name: String, retry_in: Duration },

    /// The call was attempted and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> ResilienceError<E> {
    pub fn circuit_open(name: impl Into<String>, retry_in: Duration) -> Self {
        Self::CircuitOpen {
            name: name.into(),
            retry_in,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Convert into the caller's error type.
    ///
    /// `open` builds the caller's own circuit-open variant.
    pub fn flatten(self, open: impl FnOnce(String, Duration) -> E) -> E {
        match self {
            Self::CircuitOpen { name, retry_in } => open(name, retry_in),
            Self::Inner(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err: ResilienceError<std::io::Error> =
            ResilienceError::circuit_open("github", Duration::from_secs(30));
        assert_eq!(err.to_string(), "circuit open for github, retry in 30s");
        assert!(err.is_circuit_open());
    }

    #[test]
    fn test_flatten() {
        let err: ResilienceError<String> =
            ResilienceError::circuit_open("groq", Duration::from_secs(5));
        let flat = err.flatten(|name, d| format!("{name}:{}", d.as_secs()));
        assert_eq!(flat, "groq:5");

        let err: ResilienceError<String> = ResilienceError::Inner("boom".into());
        assert_eq!(err.flatten(|_, _| unreachable!()), "boom");
    }
}
