//! Error types for the LLM crate.

use std::time::Duration;

use loom_resilience::{Classify, ResilienceError};
use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

// ─────────────────────────────────────────────────────────────────────────────
// Rate Limit Info
// ─────────────────────────────────────────────────────────────────────────────

/// Information about a rate limit error.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// The error message from the provider.
    pub message: String,
    /// How long to wait before retrying (if the provider specified).
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    /// Build from a 429 response body and its `Retry-After` header.
    ///
    /// The header wins; otherwise a "try again in 6.5s" hint in the message
    /// (as Groq sends) is used.
    pub fn parse(message: &str, retry_after_header: Option<&str>) -> Self {
        let retry_after = retry_after_header
            .and_then(parse_retry_after_header)
            .or_else(|| parse_retry_hint(message));

        Self {
            message: message.to_string(),
            retry_after,
        }
    }
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, " (retry after {:.2}s)", retry_after.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Parse a "try again in Xs" hint out of a provider message.
fn parse_retry_hint(message: &str) -> Option<Duration> {
    let patterns = ["try again in ", "Try again in ", "retry in "];

    for pattern in patterns {
        if let Some(idx) = message.find(pattern) {
            let rest = &message[idx + pattern.len()..];
            let num_str: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();

            if let Ok(seconds) = num_str.parse::<f64>() {
                if seconds.is_finite() && seconds >= 0.0 {
                    return Some(Duration::from_secs_f64(seconds));
                }
            }
        }
    }

    None
}

/// Parse a Retry-After header value in seconds.
fn parse_retry_after_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Error
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider returned an error we don't otherwise classify.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Provider returned a 5xx.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Network/connectivity error (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// The HTTP request did not complete in time.
    #[error("Request to {provider} timed out")]
    Timeout { provider: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded (retryable with backoff).
    #[error("Rate limit exceeded: {0}")]
    RateLimit(RateLimitInfo),

    /// Authentication failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The provider's breaker is open.
    #[error("circuit open for provider '{provider}', retry in {}s", retry_in.as_secs())]
    CircuitOpen { provider: String, retry_in: Duration },

    /// No provider is registered under this name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider does not offer this model.
    #[error("model '{model}' is not available from {provider}")]
    UnknownModel { provider: String, model: String },

    /// The provider needs an API key that is not configured.
    #[error("no API key configured for {0}")]
    MissingCredentials(String),
}

impl LlmError {
    /// Create a rate limit error from a message string.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(RateLimitInfo::new(message))
    }

    /// Create a rate limit error with retry timing.
    pub fn rate_limit_with_retry(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimit(RateLimitInfo::with_retry_after(message, retry_after))
    }

    /// Get the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(info) => info.retry_after,
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimit(_) | Self::Server { .. } | Self::Timeout { .. }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Lift a breaker-wrapped error into this type.
    pub fn from_resilience(err: ResilienceError<LlmError>) -> Self {
        err.flatten(|provider, retry_in| Self::CircuitOpen { provider, retry_in })
    }
}

impl Classify for LlmError {
    fn is_retryable(&self) -> bool {
        LlmError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        LlmError::retry_after(self)
    }

    /// A rejected request or bad key says nothing about the provider being down.
    fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest(_) | Self::Auth(_) | Self::Config(_) | Self::MissingCredentials(_)
        )
    }
}

impl From<ResilienceError<LlmError>> for LlmError {
    fn from(err: ResilienceError<LlmError>) -> Self {
        Self::from_resilience(err)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            LlmError::Serialization(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

/// Map a reqwest failure, reporting timeouts against `provider`.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        err.into()
    }
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: String,
}

/// Classify a non-success HTTP response.
///
/// Both the OpenAI and Anthropic APIs wrap errors as
/// `{"error": {"message": ...}}`; anything else is reported raw.
pub(crate) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

    match status.as_u16() {
        401 | 403 => LlmError::Auth(message),
        429 => LlmError::RateLimit(RateLimitInfo::parse(&message, retry_after.as_deref())),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        code @ 500..=599 => LlmError::Server {
            status: code,
            message,
        },
        _ => LlmError::Backend(message),
    }
}
