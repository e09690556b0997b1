//! macOS profile backend.
//!
//! Generates a small declarative SBPL profile per invocation (never a
//! pre-existing file) with a default-deny top-level rule, explicit
//! allows for process bookkeeping, `file-read*` for the read-only
//! subpaths, `file*` for the writable subpaths, and a network deny unless
//! the config grants access. The profile is written to a uniquely named
//! temporary path, handed to `sandbox-exec`, and deleted after the run
//! regardless of exit status. Profile paths are escaped so a hostile path
//! name cannot inject SBPL expressions.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use async_trait::async_trait;

use claude_sandbox::{SandboxCapabilities, SandboxConfig, SandboxType};

use crate::capability::PROFILE_RUNNER;
use crate::error::{ExecError, Result};
use crate::spawn::NativeCommand;

use super::IsolationBackend;

/// System library paths every profile allows reading; dynamic linking
/// fails without them.
const SYSTEM_READ_PATHS: &[&str] = &[
    "/System/Library",
    "/usr/lib",
    "/usr/share",
    "/Library/Frameworks",
    "/private/var/db/dyld",
    "/dev/null",
    "/dev/urandom",
];

/// Directories that must never be granted write access by a profile.
const PROTECTED_WRITE_ROOTS: &[&str] = &["/", "/System", "/usr", "/bin", "/sbin", "/etc"];

/// Profile-based sandbox backend.
pub struct SeatbeltBackend;

impl SeatbeltBackend {
    pub fn new() -> Self {
        Self
    }

    /// Escape a path for use inside an SBPL string literal. Prevents
    /// profile injection through hostile path names.
    fn escape_sbpl_path(path: &str) -> String {
        let mut escaped = String::with_capacity(path.len());
        for ch in path.chars() {
            match ch {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '(' => escaped.push_str("\\("),
                ')' => escaped.push_str("\\)"),
                ';' => escaped.push_str("\\;"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\0' => continue,
                _ => escaped.push(ch),
            }
        }
        escaped
    }

    /// Generate the profile text for one invocation.
    pub fn generate_profile(config: &SandboxConfig, workdir: &Path) -> Result<String> {
        let fs_policy = config.filesystem_policy(workdir);

        let writable: Vec<String> = {
            let paths = fs_policy.writable_paths();
            if paths.is_empty() {
                vec![workdir.display().to_string()]
            } else {
                paths.iter().map(|p| p.display().to_string()).collect()
            }
        };

        for path in &writable {
            if PROTECTED_WRITE_ROOTS.contains(&path.as_str()) {
                return Err(ExecError::ProfileGeneration(format!(
                    "refusing to make '{path}' writable"
                )));
            }
            if !Path::new(path).is_absolute() {
                return Err(ExecError::ProfileGeneration(format!(
                    "writable path must be absolute: {path}"
                )));
            }
        }

        let mut profile = String::with_capacity(1024);
        profile.push_str("(version 1)\n");
        profile.push_str("(deny default)\n");
        profile.push_str(
            "(allow process-exec*) (allow process-fork) (allow signal*) (allow sysctl-read)\n",
        );

        let mut read_only: Vec<String> = SYSTEM_READ_PATHS.iter().map(|p| p.to_string()).collect();
        read_only.extend(
            fs_policy
                .read_only_paths()
                .iter()
                .map(|p| p.display().to_string()),
        );

        profile.push_str("(allow file-read*");
        for path in &read_only {
            let _ = write!(profile, " (subpath \"{}\")", Self::escape_sbpl_path(path));
        }
        profile.push_str(")\n");

        profile.push_str("(allow file*");
        for path in &writable {
            let _ = write!(profile, " (subpath \"{}\")", Self::escape_sbpl_path(path));
        }
        profile.push_str(")\n");

        if config.network_policy().allow_unmatched {
            profile.push_str("(allow network*)\n");
        } else {
            profile.push_str("(deny network*)\n");
        }

        Ok(profile)
    }
}

impl Default for SeatbeltBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for SeatbeltBackend {
    fn kind(&self) -> SandboxType {
        SandboxType::Profile
    }

    fn name(&self) -> &str {
        "seatbelt"
    }

    fn available(&self, caps: &SandboxCapabilities) -> bool {
        caps.profile
    }

    fn build_invocation(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
        workdir: &Path,
    ) -> Result<NativeCommand> {
        let profile = Self::generate_profile(config, workdir)?;

        // Unique path per run; profiles are never reused across invocations.
        let mut file = tempfile::Builder::new()
            .prefix("claude-sandbox-")
            .suffix(".sb")
            .tempfile()
            .map_err(|e| ExecError::ProfileGeneration(e.to_string()))?;
        file.write_all(profile.as_bytes())
            .map_err(|e| ExecError::ProfileGeneration(e.to_string()))?;
        let profile_path = file
            .into_temp_path()
            .keep()
            .map_err(|e| ExecError::ProfileGeneration(e.to_string()))?;

        let mut sandbox_args = vec![
            "-f".to_string(),
            profile_path.display().to_string(),
            "--".to_string(),
            command.to_string(),
        ];
        sandbox_args.extend(args.iter().cloned());

        let mut invocation = NativeCommand {
            program: PROFILE_RUNNER.to_string(),
            args: sandbox_args,
            cwd: Some(workdir.to_path_buf()),
            cleanup_file: Some(profile_path),
            ..Default::default()
        };
        if let Some(env) = &config.env {
            for (key, value) in env {
                invocation.env.push((key.clone(), value.clone()));
            }
        }

        tracing::debug!(
            profile = ?invocation.cleanup_file,
            "built profile invocation"
        );
        Ok(invocation)
    }
}
