//! Named sandbox presets.
//!
//! Presets are pre-built [`SandboxConfig`] values callers merge their
//! overrides into. Each one encodes a posture rather than a mechanism:
//! the isolation type is the host's native one, and the executor still
//! degrades it through the fallback chain when the host cannot satisfy it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ContainerOptions, SandboxConfig, SandboxType};
use crate::limits::{ResourceLimits, parse_memory_string};

/// What the current host can actually provide. Produced by the exec
/// crate's capability probe; kept here as pure data so policy code and
/// tests can construct it directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxCapabilities {
    /// Namespace helper binary present (Linux).
    pub namespace: bool,
    /// Profile runner present (macOS).
    pub profile: bool,
    /// Container runtime CLI usable.
    pub container: bool,
    /// A resource-limit mechanism stronger than advisory is available.
    pub resource_limits: bool,
}

impl SandboxCapabilities {
    /// Whether any isolation mechanism is available at all.
    pub fn any_isolation(&self) -> bool {
        self.namespace || self.profile || self.container
    }
}

/// Outcome of validating a config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// The isolation mechanism native to the build target.
fn host_native_type() -> SandboxType {
    if cfg!(target_os = "linux") {
        SandboxType::Namespace
    } else if cfg!(target_os = "macos") {
        SandboxType::Profile
    } else {
        SandboxType::Container
    }
}

/// Names of all built-in presets, strongest posture first.
pub fn preset_names() -> &'static [&'static str] {
    &[
        "strict",
        "production",
        "container",
        "agent-execution",
        "network-only",
        "development",
        "unrestricted",
    ]
}

/// Look up a named preset.
pub fn preset(name: &str) -> Option<SandboxConfig> {
    let config = match name {
        "strict" => SandboxConfig {
            sandbox_type: host_native_type(),
            network_access: false,
            resource_limits: Some(ResourceLimits {
                max_memory: Some(512 * 1024 * 1024),
                max_cpu: Some(50),
                max_processes: Some(32),
                max_file_size: Some(64 * 1024 * 1024),
                max_execution_time: Some(120_000),
                max_file_descriptors: Some(256),
            }),
            ..Default::default()
        },
        "production" => SandboxConfig {
            sandbox_type: host_native_type(),
            network_access: false,
            writable_paths: vec![PathBuf::from("/tmp")],
            resource_limits: Some(ResourceLimits {
                max_memory: Some(1024 * 1024 * 1024),
                max_cpu: Some(75),
                max_processes: Some(128),
                max_file_size: Some(512 * 1024 * 1024),
                max_execution_time: Some(300_000),
                max_file_descriptors: Some(512),
            }),
            ..Default::default()
        },
        "container" => SandboxConfig {
            sandbox_type: SandboxType::Container,
            network_access: false,
            container: Some(ContainerOptions::default()),
            resource_limits: Some(ResourceLimits {
                max_memory: Some(512 * 1024 * 1024),
                max_cpu: Some(50),
                max_processes: Some(128),
                ..Default::default()
            }),
            ..Default::default()
        },
        "agent-execution" => SandboxConfig {
            sandbox_type: host_native_type(),
            network_access: true,
            writable_paths: vec![PathBuf::from("/tmp")],
            read_only_paths: vec![
                PathBuf::from("/usr"),
                PathBuf::from("/bin"),
                PathBuf::from("/lib"),
                PathBuf::from("/etc"),
            ],
            resource_limits: Some(ResourceLimits {
                max_memory: Some(1024 * 1024 * 1024),
                max_cpu: Some(80),
                max_processes: Some(256),
                max_execution_time: Some(600_000),
                max_file_descriptors: Some(1024),
                ..Default::default()
            }),
            ..Default::default()
        },
        "network-only" => SandboxConfig {
            sandbox_type: host_native_type(),
            network_access: false,
            writable_paths: vec![PathBuf::from("/")],
            ..Default::default()
        },
        "development" => SandboxConfig {
            sandbox_type: host_native_type(),
            network_access: true,
            writable_paths: vec![PathBuf::from("/tmp")],
            resource_limits: Some(ResourceLimits {
                max_memory: Some(2 * 1024 * 1024 * 1024),
                max_execution_time: Some(600_000),
                ..Default::default()
            }),
            ..Default::default()
        },
        "unrestricted" => SandboxConfig {
            sandbox_type: SandboxType::None,
            network_access: true,
            ..Default::default()
        },
        _ => return None,
    };
    Some(config)
}

/// Pick the strongest preset the host can actually satisfy.
pub fn recommend_preset(caps: &SandboxCapabilities) -> &'static str {
    if caps.namespace || caps.profile {
        "strict"
    } else if caps.container {
        "container"
    } else if caps.resource_limits {
        "development"
    } else {
        "unrestricted"
    }
}

/// Credential directories under the home directory that must never be
/// granted write access.
const SENSITIVE_HOME_SUBDIRS: &[&str] = &[".ssh", ".aws", ".gnupg", ".kube"];

/// Validate a config before any process work begins.
///
/// Collects every problem instead of stopping at the first so callers can
/// report them all at once.
pub fn validate(config: &SandboxConfig) -> ValidationResult {
    let mut errors = Vec::new();

    // A path at or inside a credential directory is always a mistake.
    // Broad roots like "/" are left to the individual backends, which
    // refuse or fall back on their own terms.
    if let Some(home) = dirs::home_dir() {
        for sub in SENSITIVE_HOME_SUBDIRS {
            let sensitive = home.join(sub);
            for path in &config.writable_paths {
                if path.starts_with(&sensitive) {
                    errors.push(format!(
                        "writable path {} is inside credential directory {}",
                        path.display(),
                        sensitive.display()
                    ));
                }
            }
        }
    }

    if let Some(limits) = &config.resource_limits {
        if let Err(e) = limits.validate() {
            errors.push(e.to_string());
        }
    }

    for path in config
        .read_only_paths
        .iter()
        .chain(config.writable_paths.iter())
    {
        if !path.is_absolute() {
            errors.push(format!(
                "path must be absolute: {} (normalize before validating)",
                path.display()
            ));
        }
    }

    if let Some(container) = &config.container {
        if container.image.trim().is_empty() {
            errors.push("container image must not be empty".to_string());
        }
        if let Some(memory) = &container.memory {
            if let Err(e) = parse_memory_string(memory) {
                errors.push(e.to_string());
            }
        }
        if let Some(cpus) = container.cpus {
            if cpus <= 0.0 {
                errors.push(format!("container cpus must be positive, got {cpus}"));
            }
        }
        for volume in &container.volumes {
            if !volume.container.is_absolute() {
                errors.push(format!(
                    "container mount point must be absolute: {}",
                    volume.container.display()
                ));
            }
        }
    }

    if config.sandbox_type == SandboxType::Container && config.container.is_none() {
        tracing::debug!("container type with no options, defaults will be used");
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}
