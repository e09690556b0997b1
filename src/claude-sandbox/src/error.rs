//! Error types for the sandbox policy model.

use thiserror::Error;

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors raised while building or validating a sandbox policy.
///
/// These are the only errors the engine surfaces to callers: they are
/// produced before any process work begins. Runtime failures inside the
/// executor are absorbed into the fallback chain instead.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Malformed memory size: {0}")]
    MalformedMemorySize(String),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Path must be absolute: {0}")]
    RelativePath(String),

    #[error("Invalid path pattern: {0}")]
    InvalidPattern(String),
}

impl PolicyError {
    /// Convenience constructor for field-level validation failures.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}
