//! Linux namespace backend.
//!
//! Shells out to the `bwrap` helper binary, which builds the sandbox from
//! kernel namespaces: read-only binds for the configured read-only paths,
//! read-write binds for the writable paths, and an unshared network
//! namespace when network access is off. Default-deny falls out of the
//! mount namespace itself: anything not explicitly bound does not exist
//! inside the sandbox.

use std::path::Path;

use async_trait::async_trait;

use claude_sandbox::{SandboxCapabilities, SandboxConfig, SandboxType};

use crate::capability::NAMESPACE_HELPER;
use crate::error::Result;
use crate::spawn::NativeCommand;

use super::IsolationBackend;

/// System paths bound read-only so dynamically linked binaries can run
/// even when the caller lists no read-only paths of their own.
const SYSTEM_RO_PATHS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"];

/// Namespace-based sandbox backend.
pub struct BubblewrapBackend;

impl BubblewrapBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BubblewrapBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for BubblewrapBackend {
    fn kind(&self) -> SandboxType {
        SandboxType::Namespace
    }

    fn name(&self) -> &str {
        "bubblewrap"
    }

    fn available(&self, caps: &SandboxCapabilities) -> bool {
        caps.namespace
    }

    fn build_invocation(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
        workdir: &Path,
    ) -> Result<NativeCommand> {
        let fs_policy = config.filesystem_policy(workdir);
        let net_policy = config.network_policy();

        let mut bwrap_args = vec![
            "--die-with-parent".to_string(),
            "--unshare-pid".to_string(),
            "--proc".to_string(),
            "/proc".to_string(),
            "--dev".to_string(),
            "/dev".to_string(),
        ];

        if !net_policy.allow_unmatched {
            bwrap_args.push("--unshare-net".to_string());
        }

        for path in SYSTEM_RO_PATHS {
            if Path::new(path).exists() {
                bwrap_args.push("--ro-bind".to_string());
                bwrap_args.push(path.to_string());
                bwrap_args.push(path.to_string());
            }
        }

        for path in fs_policy.read_only_paths() {
            let p = path.display().to_string();
            bwrap_args.push("--ro-bind".to_string());
            bwrap_args.push(p.clone());
            bwrap_args.push(p);
        }

        // An empty writable set still gets the working directory, matching
        // the filesystem policy's default posture.
        let writable = fs_policy.writable_paths();
        if writable.is_empty() {
            let wd = workdir.display().to_string();
            bwrap_args.push("--bind".to_string());
            bwrap_args.push(wd.clone());
            bwrap_args.push(wd);
        } else {
            for path in writable {
                let p = path.display().to_string();
                bwrap_args.push("--bind".to_string());
                bwrap_args.push(p.clone());
                bwrap_args.push(p);
            }
        }

        bwrap_args.push("--chdir".to_string());
        bwrap_args.push(workdir.display().to_string());

        bwrap_args.push("--".to_string());
        bwrap_args.push(command.to_string());
        bwrap_args.extend(args.iter().cloned());

        let mut invocation = NativeCommand {
            program: NAMESPACE_HELPER.to_string(),
            args: bwrap_args,
            ..Default::default()
        };
        if let Some(env) = &config.env {
            for (key, value) in env {
                invocation.env.push((key.clone(), value.clone()));
            }
        }

        tracing::debug!(args = ?invocation.args, "built namespace invocation");
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn build(config: &SandboxConfig) -> NativeCommand {
        BubblewrapBackend::new()
            .build_invocation(
                "echo",
                &["hi".to_string()],
                config,
                Path::new("/workspace"),
            )
            .unwrap()
    }

    fn has_triple(args: &[String], flag: &str, path: &str) -> bool {
        args.windows(3)
            .any(|w| w[0] == flag && w[1] == path && w[2] == path)
    }

    #[test]
    fn test_network_unshared_when_denied() {
        let invocation = build(&SandboxConfig::default());
        assert!(invocation.args.contains(&"--unshare-net".to_string()));

        let with_net = build(&SandboxConfig {
            network_access: true,
            ..Default::default()
        });
        assert!(!with_net.args.contains(&"--unshare-net".to_string()));
    }

    #[test]
    fn test_read_only_and_writable_binds() {
        let config = SandboxConfig {
            read_only_paths: vec![PathBuf::from("/opt/data")],
            writable_paths: vec![PathBuf::from("/scratch")],
            ..Default::default()
        };
        let invocation = build(&config);

        assert!(has_triple(&invocation.args, "--ro-bind", "/opt/data"));
        assert!(has_triple(&invocation.args, "--bind", "/scratch"));
        // Explicit writable set means no implicit workdir bind.
        assert!(!has_triple(&invocation.args, "--bind", "/workspace"));
    }

    #[test]
    fn test_empty_writable_set_binds_workdir() {
        let invocation = build(&SandboxConfig::default());
        assert!(has_triple(&invocation.args, "--bind", "/workspace"));
    }

    #[test]
    fn test_command_follows_separator() {
        let invocation = build(&SandboxConfig::default());
        let sep = invocation.args.iter().position(|a| a == "--").unwrap();
        assert_eq!(invocation.args[sep + 1], "echo");
        assert_eq!(invocation.args[sep + 2], "hi");
        assert_eq!(invocation.program, "bwrap");
    }

    #[test]
    fn test_unavailable_without_probe_grant() {
        let backend = BubblewrapBackend::new();
        assert!(!backend.available(&SandboxCapabilities::default()));
        assert!(backend.available(&SandboxCapabilities {
            namespace: true,
            ..Default::default()
        }));
    }
}
