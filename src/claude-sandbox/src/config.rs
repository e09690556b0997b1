//! Per-invocation sandbox configuration.
//!
//! A [`SandboxConfig`] is the unit of configuration a caller hands to the
//! executor. It is immutable for the lifetime of one invocation and is
//! usually built by merging a named preset with caller overrides.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fs::{FilesystemPolicy, PathPermission, PathRule, normalize_path};
use crate::limits::ResourceLimits;
use crate::net::NetworkPolicy;

/// The isolation mechanism a config requests, or the one an execution
/// actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxType {
    /// Linux namespace sandboxing via a helper binary.
    Namespace,
    /// macOS profile-based sandboxing.
    Profile,
    /// Container-based isolation.
    Container,
    /// Direct execution, no isolation.
    #[default]
    None,
}

impl SandboxType {
    /// Whether this mechanism provides any isolation at all.
    pub fn is_sandboxed(&self) -> bool {
        !matches!(self, SandboxType::None)
    }

    /// Whether this mechanism is tied to a specific host OS.
    pub fn host_specific(&self) -> bool {
        matches!(self, SandboxType::Namespace | SandboxType::Profile)
    }
}

impl fmt::Display for SandboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxType::Namespace => write!(f, "namespace"),
            SandboxType::Profile => write!(f, "profile"),
            SandboxType::Container => write!(f, "container"),
            SandboxType::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for SandboxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" => Ok(SandboxType::Namespace),
            "profile" => Ok(SandboxType::Profile),
            "container" => Ok(SandboxType::Container),
            "none" => Ok(SandboxType::None),
            other => Err(format!("unknown sandbox type: {other}")),
        }
    }
}

/// Container network mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerNetwork {
    /// No network access (most restrictive).
    #[default]
    None,
    /// Isolated bridge network.
    Bridge,
    /// Host network (no isolation).
    Host,
}

impl ContainerNetwork {
    /// The container runtime's `--network` value.
    pub fn as_runtime_arg(&self) -> &'static str {
        match self {
            ContainerNetwork::None => "none",
            ContainerNetwork::Bridge => "bridge",
            ContainerNetwork::Host => "host",
        }
    }
}

/// One host-to-container bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Path on the host.
    pub host: PathBuf,
    /// Mount point inside the container.
    pub container: PathBuf,
    /// Read-only mount.
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// A read-only bind mount.
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    /// A read-write bind mount.
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// The container runtime's `-v` value.
    pub fn as_runtime_arg(&self) -> String {
        let ro = if self.read_only { ":ro" } else { "" };
        format!("{}:{}{ro}", self.host.display(), self.container.display())
    }
}

fn default_image() -> String {
    "ubuntu:24.04".to_string()
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_true() -> bool {
    true
}

/// Options specific to the container backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContainerOptions {
    /// Image to run. Pulled on first use if not present locally.
    pub image: String,
    /// Explicit bind mounts. Empty means "bind the working directory
    /// read-write at `workdir`".
    pub volumes: Vec<VolumeMount>,
    /// Network mode.
    pub network: ContainerNetwork,
    /// Memory ceiling as a memory-size string (overrides the resource
    /// limits' memory for this backend when set).
    pub memory: Option<String>,
    /// CPU ceiling in cores.
    pub cpus: Option<f32>,
    /// Mount the root filesystem read-only, with a writable tmpfs at /tmp.
    pub read_only: bool,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    /// Remove the container after the run.
    pub remove: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            image: default_image(),
            volumes: Vec::new(),
            network: ContainerNetwork::default(),
            memory: None,
            cpus: None,
            read_only: false,
            workdir: default_workdir(),
            remove: true,
        }
    }
}

/// The unit of configuration passed per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SandboxConfig {
    /// Master switch. Disabled means direct execution regardless of type.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requested isolation mechanism.
    #[serde(rename = "type")]
    pub sandbox_type: SandboxType,
    /// Blanket outbound network grant.
    pub network_access: bool,
    /// Paths exposed read-only inside the sandbox.
    pub read_only_paths: Vec<PathBuf>,
    /// Paths exposed read-write inside the sandbox.
    pub writable_paths: Vec<PathBuf>,
    /// Resource ceilings, if any.
    pub resource_limits: Option<ResourceLimits>,
    /// Container backend options.
    pub container: Option<ContainerOptions>,
    /// Extra environment for the child, applied after the engine's
    /// sensitive-variable filtering.
    pub env: Option<HashMap<String, String>>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sandbox_type: SandboxType::None,
            network_access: false,
            read_only_paths: Vec::new(),
            writable_paths: Vec::new(),
            resource_limits: None,
            container: None,
            env: None,
        }
    }
}

/// Partial overrides merged onto a base config (usually a preset).
///
/// Absent fields keep the base value. List-valued fields (paths, volumes)
/// REPLACE the base list when present; they are never concatenated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SandboxOverrides {
    pub enabled: Option<bool>,
    #[serde(rename = "type")]
    pub sandbox_type: Option<SandboxType>,
    pub network_access: Option<bool>,
    pub read_only_paths: Option<Vec<PathBuf>>,
    pub writable_paths: Option<Vec<PathBuf>>,
    pub resource_limits: Option<ResourceLimits>,
    pub container: Option<ContainerOptions>,
    pub env: Option<HashMap<String, String>>,
}

impl SandboxConfig {
    /// The mechanism this config effectively requests: a disabled config
    /// always resolves to direct execution.
    pub fn effective_type(&self) -> SandboxType {
        if self.enabled {
            self.sandbox_type
        } else {
            SandboxType::None
        }
    }

    /// Merge a base config (usually a preset) with caller overrides.
    ///
    /// Scalar fields take the override when present. List-valued fields are
    /// replaced wholesale: an override that provides `writable_paths`
    /// fully describes the mount set it wants.
    pub fn merge(base: &Self, overrides: SandboxOverrides) -> Self {
        Self {
            enabled: overrides.enabled.unwrap_or(base.enabled),
            sandbox_type: overrides.sandbox_type.unwrap_or(base.sandbox_type),
            network_access: overrides.network_access.unwrap_or(base.network_access),
            read_only_paths: overrides
                .read_only_paths
                .unwrap_or_else(|| base.read_only_paths.clone()),
            writable_paths: overrides
                .writable_paths
                .unwrap_or_else(|| base.writable_paths.clone()),
            resource_limits: overrides
                .resource_limits
                .or_else(|| base.resource_limits.clone()),
            container: overrides.container.or_else(|| base.container.clone()),
            env: overrides.env.or_else(|| base.env.clone()),
        }
    }

    /// Normalize every configured path to absolute form, in place.
    /// Relative paths resolve against the process working directory.
    pub fn normalize_paths(&mut self) -> crate::error::Result<()> {
        for path in self
            .read_only_paths
            .iter_mut()
            .chain(self.writable_paths.iter_mut())
        {
            *path = normalize_path(path)?;
        }
        Ok(())
    }

    /// Compile the path lists into an ordered filesystem policy anchored
    /// at `workdir`. Writable rules come first so a path listed in both
    /// sets stays writable.
    pub fn filesystem_policy(&self, workdir: &Path) -> FilesystemPolicy {
        let mut rules = Vec::with_capacity(self.writable_paths.len() + self.read_only_paths.len());
        for path in &self.writable_paths {
            rules.push(PathRule::new(
                path.display().to_string(),
                PathPermission::Write,
            ));
        }
        for path in &self.read_only_paths {
            rules.push(PathRule::new(
                path.display().to_string(),
                PathPermission::Read,
            ));
        }
        FilesystemPolicy::with_workdir(rules, workdir)
    }

    /// Compile the network grant into a policy.
    pub fn network_policy(&self) -> NetworkPolicy {
        if self.network_access {
            NetworkPolicy::allow_all()
        } else {
            NetworkPolicy::deny_all()
        }
    }

    /// Resource limits, defaulting to unconstrained.
    pub fn limits(&self) -> ResourceLimits {
        self.resource_limits.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disabled_config_is_effectively_none() {
        let config = SandboxConfig {
            enabled: false,
            sandbox_type: SandboxType::Container,
            ..Default::default()
        };
        assert_eq!(config.effective_type(), SandboxType::None);
    }

    #[test]
    fn test_merge_scalars() {
        let base = SandboxConfig {
            sandbox_type: SandboxType::Namespace,
            network_access: false,
            ..Default::default()
        };
        let merged = SandboxConfig::merge(
            &base,
            SandboxOverrides {
                network_access: Some(true),
                ..Default::default()
            },
        );

        assert_eq!(merged.sandbox_type, SandboxType::Namespace);
        assert!(merged.network_access);
    }

    #[test]
    fn test_merge_replaces_lists() {
        let base = SandboxConfig {
            writable_paths: vec![PathBuf::from("/workspace"), PathBuf::from("/tmp")],
            read_only_paths: vec![PathBuf::from("/usr")],
            ..Default::default()
        };
        let merged = SandboxConfig::merge(
            &base,
            SandboxOverrides {
                writable_paths: Some(vec![PathBuf::from("/scratch")]),
                ..Default::default()
            },
        );

        // Provided list replaces the base wholesale; absent list is kept.
        assert_eq!(merged.writable_paths, vec![PathBuf::from("/scratch")]);
        assert_eq!(merged.read_only_paths, vec![PathBuf::from("/usr")]);
    }

    #[test]
    fn test_merge_keeps_base_limits_when_absent() {
        let base = SandboxConfig {
            resource_limits: Some(ResourceLimits::default().with_cpu_percent(25)),
            ..Default::default()
        };
        let merged = SandboxConfig::merge(&base, SandboxOverrides::default());
        assert_eq!(merged.resource_limits.unwrap().max_cpu, Some(25));
    }

    #[test]
    fn test_filesystem_policy_writable_wins_on_overlap() {
        let config = SandboxConfig {
            writable_paths: vec![PathBuf::from("/data")],
            read_only_paths: vec![PathBuf::from("/data")],
            ..Default::default()
        };

        let policy = config.filesystem_policy(Path::new("/workspace"));
        assert_eq!(policy.matches("/data/file"), PathPermission::Write);
    }

    #[test]
    fn test_network_policy_follows_grant() {
        let mut config = SandboxConfig::default();
        assert!(!config.network_policy().matches("example.com"));

        config.network_access = true;
        assert!(config.network_policy().matches("example.com"));
    }

    #[test]
    fn test_sandbox_type_roundtrip() {
        for ty in [
            SandboxType::Namespace,
            SandboxType::Profile,
            SandboxType::Container,
            SandboxType::None,
        ] {
            let parsed: SandboxType = ty.to_string().parse().unwrap();
            assert_eq!(parsed, ty);
        }
        assert!("jail".parse::<SandboxType>().is_err());
    }

    #[test]
    fn test_config_json_field_names() {
        let config = SandboxConfig {
            sandbox_type: SandboxType::Container,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "container");
        assert_eq!(json["network-access"], false);
    }

    #[test]
    fn test_volume_mount_runtime_arg() {
        let ro = VolumeMount::read_only("/host", "/guest");
        assert_eq!(ro.as_runtime_arg(), "/host:/guest:ro");

        let rw = VolumeMount::read_write("/host", "/guest");
        assert_eq!(rw.as_runtime_arg(), "/host:/guest");
    }
}
