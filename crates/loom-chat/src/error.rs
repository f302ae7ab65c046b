//! Error types for the chat crate.

use std::time::Duration;

use loom_resilience::Classify;
use thiserror::Error;

/// Result type alias using the chat error type.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Error type for chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Provider call or provider switch failed.
    #[error("LLM error: {0}")]
    Llm(#[from] loom_llm::LlmError),

    /// Tool-server operation failed.
    #[error("MCP error: {0}")]
    Mcp(#[from] loom_mcp::McpError),

    /// The turn did not finish before its deadline.
    #[error("turn timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    /// Rejected input from the presentation layer.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether resending the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable() || e.is_circuit_open(),
            Self::Mcp(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::InvalidInput(_) => false,
        }
    }

    /// Fast failure from an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_circuit_open(),
            Self::Mcp(e) => matches!(e, loom_mcp::McpError::CircuitOpen { .. }),
            _ => false,
        }
    }
}
