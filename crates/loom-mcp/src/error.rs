//! Error types for tool-server operations.

use std::time::Duration;

use loom_resilience::{Classify, ResilienceError};
use thiserror::Error;

/// Result type for tool-server operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for tool-server operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// The transport is closed or was never opened; nothing was sent.
    #[error("server '{0}' is not connected")]
    NotConnected(String),

    /// Writing the request to the child failed; the request was not delivered.
    #[error("failed to send request: {0}")]
    SendFailed(String),

    /// Failed to communicate with the server.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Server not initialized.
    #[error("server not initialized - call initialize() first")]
    NotInitialized,

    /// The child closed its output while a request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Timeout waiting for response.
    #[error("timeout waiting for {method} after {}ms", after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The connection's breaker is open.
    #[error("circuit open for server '{server}', retry in {}s", retry_in.as_secs())]
    CircuitOpen { server: String, retry_in: Duration },

    /// The owning server is in the Failed state.
    #[error("server '{0}' is unavailable")]
    ServerUnavailable(String),

    /// No server owns the requested tool.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// No server lists the requested resource.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// No server owns the requested prompt.
    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    /// No server is configured under this name.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Two servers expose the same tool or prompt name.
    #[error("{kind} '{name}' is exposed by both '{first}' and '{second}'")]
    NameCollision {
        kind: &'static str,
        name: String,
        first: String,
        second: String,
    },
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn timeout(method: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            after,
        }
    }

    /// Whether the request is known not to have reached the server.
    ///
    /// Only these failures may be resent for non-idempotent calls.
    pub fn is_undelivered(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_)
                | Self::NotConnected(_)
                | Self::SendFailed(_)
                | Self::NotInitialized
                | Self::CircuitOpen { .. }
        )
    }

    /// The server answered with a JSON-RPC method-not-found error.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::ServerError { code, .. } if *code == crate::protocol::JsonRpcError::METHOD_NOT_FOUND)
    }

    /// Lift a breaker-wrapped error into this type.
    pub fn from_resilience(err: ResilienceError<McpError>) -> Self {
        err.flatten(|server, retry_in| Self::CircuitOpen { server, retry_in })
    }
}

impl Classify for McpError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Io(_)
                | Self::SendFailed(_)
                | Self::ConnectionClosed
                | Self::Timeout { .. }
                | Self::Protocol(_)
                | Self::Json(_)
        )
    }

    fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::ServerError { .. })
    }
}

impl From<ResilienceError<McpError>> for McpError {
    fn from(err: ResilienceError<McpError>) -> Self {
        Self::from_resilience(err)
    }
}
