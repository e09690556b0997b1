//! Tests for the sandbox policy model.
//!
//! Cross-module scenarios:
//! 1. Preset + override merge feeding policy compilation
//! 2. Default-deny posture end to end
//! 3. Serialized config round-trips

use super::*;
use std::path::{Path, PathBuf};

mod preset_merge_tests {
    use super::*;
    use crate::config::SandboxOverrides;

    #[test]
    fn test_strict_preset_with_caller_paths() {
        let base = preset("strict").unwrap();
        let merged = SandboxConfig::merge(
            &base,
            SandboxOverrides {
                writable_paths: Some(vec![PathBuf::from("/workspace/out")]),
                ..Default::default()
            },
        );

        let policy = merged.filesystem_policy(Path::new("/workspace"));
        assert_eq!(policy.matches("/workspace/out/a.txt"), PathPermission::Write);
        assert_eq!(policy.matches("/etc/passwd"), PathPermission::Deny);

        // Merge never weakens the preset's network posture by accident.
        assert!(!merged.network_access);
        assert!(!merged.network_policy().matches("example.com"));
    }

    #[test]
    fn test_merged_config_still_validates() {
        let base = preset("agent-execution").unwrap();
        let merged = SandboxConfig::merge(
            &base,
            SandboxOverrides {
                resource_limits: Some(
                    ResourceLimits::default()
                        .with_memory("256m")
                        .unwrap()
                        .with_cpu_percent(25),
                ),
                ..Default::default()
            },
        );

        let result = presets::validate(&merged);
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(merged.limits().max_memory, Some(256 * 1024 * 1024));
    }
}

mod posture_tests {
    use super::*;

    #[test]
    fn test_tmp_write_root_deny_ordering() {
        // [{/tmp, write}, {/, deny}]: /tmp/x writes, /etc/passwd denied.
        let policy = FilesystemPolicy::with_workdir(
            vec![
                PathRule::new("/tmp", PathPermission::Write),
                PathRule::new("/", PathPermission::Deny),
            ],
            "/workspace",
        );

        assert_eq!(policy.matches("/tmp/x"), PathPermission::Write);
        assert_eq!(policy.matches("/etc/passwd"), PathPermission::Deny);
    }

    #[test]
    fn test_network_only_preset_keeps_filesystem_open() {
        let config = preset("network-only").unwrap();
        let policy = config.filesystem_policy(Path::new("/workspace"));

        assert_eq!(policy.matches("/etc/hosts"), PathPermission::Write);
        assert!(!config.network_policy().matches("example.com"));
    }
}

mod serde_tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let config = preset("container").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: SandboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"type": "namespace", "network-access": true}"#).unwrap();

        assert!(config.enabled);
        assert_eq!(config.sandbox_type, SandboxType::Namespace);
        assert!(config.network_access);
        assert!(config.read_only_paths.is_empty());
    }
}
