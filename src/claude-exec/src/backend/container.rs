//! Container backend.
//!
//! Builds a container runtime `run` invocation: `--rm` unless the caller
//! keeps the container, resource flags sourced from the limits, a network
//! mode flag, bind mounts (defaulting to the working directory mounted
//! read-write), an optional read-only root with a writable tmpfs at /tmp,
//! and user-id mapping so output files are not root-owned. Only the
//! runtime CLI is assumed present, never a daemon API. A missing image is
//! pulled before first use; pull failure degrades to the next fallback
//! instead of surfacing.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use claude_sandbox::{
    ContainerNetwork, ContainerOptions, SandboxCapabilities, SandboxConfig, SandboxType,
    parse_memory_string,
};

use crate::capability::CONTAINER_RUNTIME;
use crate::error::{ExecError, Result};
use crate::limits::ResourceLimiter;
use crate::spawn::{self, NativeCommand, SpawnOutcome};

use super::IsolationBackend;

/// Ceiling on how long an image pull may take before the backend gives
/// up and falls through.
const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Container-runtime sandbox backend.
pub struct ContainerBackend;

impl ContainerBackend {
    pub fn new() -> Self {
        Self
    }

    /// Pull the image if it is not already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = tokio::process::Command::new(CONTAINER_RUNTIME)
            .args(["image", "inspect", image])
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: CONTAINER_RUNTIME.to_string(),
                source: e,
            })?;
        if inspect.status.success() {
            return Ok(());
        }

        tracing::info!(image, "image not present locally, pulling");
        let pull = tokio::time::timeout(
            IMAGE_PULL_TIMEOUT,
            tokio::process::Command::new(CONTAINER_RUNTIME)
                .args(["pull", image])
                .output(),
        )
        .await
        .map_err(|_| ExecError::ImagePull {
            image: image.to_string(),
            message: format!("pull timed out after {IMAGE_PULL_TIMEOUT:?}"),
        })?
        .map_err(|e| ExecError::Spawn {
            program: CONTAINER_RUNTIME.to_string(),
            source: e,
        })?;

        if pull.status.success() {
            Ok(())
        } else {
            Err(ExecError::ImagePull {
                image: image.to_string(),
                message: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
            })
        }
    }

    fn network_mode(config: &SandboxConfig, opts: &ContainerOptions) -> ContainerNetwork {
        if !config.network_access {
            return ContainerNetwork::None;
        }
        match opts.network {
            // A blanket grant with no explicit mode still gets an
            // isolated bridge, not the host network.
            ContainerNetwork::None => ContainerNetwork::Bridge,
            other => other,
        }
    }
}

impl Default for ContainerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for ContainerBackend {
    fn kind(&self) -> SandboxType {
        SandboxType::Container
    }

    fn name(&self) -> &str {
        "container"
    }

    fn available(&self, caps: &SandboxCapabilities) -> bool {
        caps.container
    }

    fn build_invocation(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
        workdir: &Path,
    ) -> Result<NativeCommand> {
        let opts = config.container.clone().unwrap_or_default();
        let limits = config.limits();

        let mut run_args = vec!["run".to_string()];
        if opts.remove {
            run_args.push("--rm".to_string());
        }

        run_args.push(format!(
            "--network={}",
            Self::network_mode(config, &opts).as_runtime_arg()
        ));

        let memory = match &opts.memory {
            Some(s) => Some(parse_memory_string(s)?),
            None => limits.max_memory,
        };
        if let Some(bytes) = memory {
            run_args.push(format!("--memory={bytes}b"));
        }

        let cpus = opts.cpus.or(limits.max_cpu.map(|c| f32::from(c) / 100.0));
        if let Some(cpus) = cpus {
            run_args.push(format!("--cpus={cpus:.2}"));
        }

        if let Some(pids) = limits.max_processes {
            run_args.push(format!("--pids-limit={pids}"));
        }

        run_args.push("--workdir".to_string());
        run_args.push(opts.workdir.display().to_string());

        if opts.volumes.is_empty() {
            // Default: the working directory, read-write, at the
            // configured container workdir.
            run_args.push("-v".to_string());
            run_args.push(format!("{}:{}", workdir.display(), opts.workdir.display()));
        } else {
            for volume in &opts.volumes {
                run_args.push("-v".to_string());
                run_args.push(volume.as_runtime_arg());
            }
        }

        if opts.read_only {
            run_args.push("--read-only".to_string());
            run_args.push("--tmpfs".to_string());
            run_args.push("/tmp".to_string());
        }

        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            let gid = unsafe { libc::getgid() };
            run_args.push(format!("--user={uid}:{gid}"));
        }

        if let Some(env) = &config.env {
            for (key, value) in env {
                run_args.push("-e".to_string());
                run_args.push(format!("{key}={value}"));
            }
        }

        run_args.push(opts.image.clone());
        run_args.push(command.to_string());
        run_args.extend(args.iter().cloned());

        tracing::debug!(args = ?run_args, "built container invocation");
        Ok(NativeCommand {
            program: CONTAINER_RUNTIME.to_string(),
            args: run_args,
            image: Some(opts.image),
            ..Default::default()
        })
    }

    async fn execute(
        &self,
        invocation: NativeCommand,
        timeout: Option<Duration>,
        limiter: Option<&ResourceLimiter>,
    ) -> Result<SpawnOutcome> {
        if let Some(image) = &invocation.image {
            self.ensure_image(image).await?;
        }
        spawn::run(&invocation, timeout, limiter).await
    }
}
