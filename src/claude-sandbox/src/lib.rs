//! Claude Sandbox - Declarative sandbox policy model.
//!
//! This crate holds the pure-data half of the sandbox engine: the
//! per-invocation [`SandboxConfig`], resource limit specifications,
//! filesystem and network access policies, and the named presets that
//! callers merge their overrides into. Nothing here spawns processes;
//! the `claude-exec` crate translates these policies into native
//! isolation mechanisms.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   SandboxConfig                      │
//! │   (preset ⊕ caller overrides, validated, immutable)  │
//! ├──────────────┬──────────────────┬───────────────────┤
//! │ Filesystem   │  NetworkPolicy   │  ResourceLimits   │
//! │   Policy     │                  │                   │
//! └──────────────┴──────────────────┴───────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod limits;
pub mod net;
pub mod presets;

#[cfg(test)]
mod tests;

pub use config::{
    ContainerNetwork, ContainerOptions, SandboxConfig, SandboxOverrides, SandboxType, VolumeMount,
};
pub use error::{PolicyError, Result};
pub use fs::{FilesystemPolicy, PathPermission, PathRule};
pub use limits::{ResourceLimits, parse_memory_string};
pub use net::{NetworkPolicy, NetworkStats, NetworkStatsSnapshot};
pub use presets::{SandboxCapabilities, ValidationResult, preset, preset_names, recommend_preset};
