//! Claude Exec - Sandboxed command execution engine.
//!
//! Runs externally supplied commands under process isolation, applies
//! resource limits through the best mechanism the host offers, and
//! degrades transparently through a deterministic fallback chain when the
//! preferred mechanism is unavailable:
//!
//! ```text
//! namespace (Linux) → profile (macOS) → container → direct execution
//! ```
//!
//! A missing helper binary never crashes a caller; it only weakens the
//! isolation guarantee the result reports back.
//!
//! # Usage
//!
//! ```rust,ignore
//! use claude_exec::SandboxExecutor;
//! use claude_sandbox::preset;
//!
//! let executor = SandboxExecutor::new();
//! let config = preset("strict").unwrap();
//! let result = executor.execute("echo", &["hi".into()], &config).await?;
//! assert!(result.sandboxed || result.sandbox_type == claude_sandbox::SandboxType::None);
//! ```

pub mod backend;
pub mod capability;
pub mod error;
pub mod executor;
pub mod limits;
pub mod spawn;

#[cfg(test)]
mod tests;

pub use backend::IsolationBackend;
pub use capability::CapabilityProbe;
pub use error::{ExecError, Result};
pub use executor::{CommandSpec, ExecutorResult, SandboxExecutor};
pub use limits::{EnforcementClass, LimitStatus, ResourceLimiter, ResourceUsage};
pub use spawn::{NativeCommand, SpawnOutcome};
