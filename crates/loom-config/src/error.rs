//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to parse the JSON server launch file.
    #[error("invalid JSON in '{path}': {source}")]
    ParseJson {
        path: String,
        source: serde_json::Error,
    },

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A field is present but unusable.
    #[error("invalid value for '{field}' in {context}: {reason}")]
    InvalidValue {
        field: String,
        context: String,
        reason: String,
    },
}

impl ConfigError {
    /// Configuration errors never resolve on their own.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
