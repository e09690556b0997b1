//! Error types for the execution engine.
//!
//! Only [`ExecError::ConfigValidation`] ever reaches a caller of the
//! executor: it is raised before any process work begins. Every other
//! variant is absorbed into the fallback chain or folded into the
//! returned result.

use std::time::Duration;

use thiserror::Error;

use claude_sandbox::PolicyError;

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors produced while preparing or running a sandboxed invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Bad preset/merge input, rejected before any process spawns.
    #[error("Configuration rejected: {}", errors.join("; "))]
    ConfigValidation { errors: Vec<String> },

    /// A backend's availability probe failed. Triggers fallback.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// ENOENT/EACCES on the chosen backend's own binary. Triggers fallback.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Container image could not be pulled. Triggers fallback.
    #[error("Image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    /// Malformed policy prevented profile text generation. Triggers fallback.
    #[error("Profile generation failed: {0}")]
    ProfileGeneration(String),

    /// Execution exceeded the configured ceiling. The process is killed
    /// and the condition is folded into the result, never re-thrown.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Advisory signal from the limit poller. Never thrown automatically.
    #[error("Resource limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ExecError {
    /// Whether this failure takes the fallback edge instead of surfacing.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            ExecError::BackendUnavailable(_)
                | ExecError::Spawn { .. }
                | ExecError::ImagePull { .. }
                | ExecError::ProfileGeneration(_)
        )
    }
}
