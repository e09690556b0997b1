//! Shared process spawn path.
//!
//! Every backend funnels its native invocation through [`run`]: one child
//! process, output buffered in memory for the lifetime of the invocation,
//! an optional wall-clock ceiling with graceful SIGTERM-then-SIGKILL
//! escalation, and unconditional cleanup of backend scratch files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::error::{ExecError, Result};
use crate::limits::ResourceLimiter;

/// Ceiling on buffered stdout/stderr, each.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between the terminate signal and the forced kill. A
/// well-behaved child gets this long to flush output and exit.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Patterns in variable names that indicate sensitive data (case-insensitive).
/// These are excluded from the environment passed to child processes.
const SENSITIVE_PATTERNS: &[&str] = &["KEY", "SECRET", "TOKEN", "PASSWORD", "CREDENTIAL", "PRIVATE"];

/// A backend-native invocation ready to spawn.
#[derive(Debug, Clone, Default)]
pub struct NativeCommand {
    /// The program to execute (the sandbox helper, or the command itself
    /// for direct execution).
    pub program: String,
    /// Arguments to the program.
    pub args: Vec<String>,
    /// Environment set on top of the filtered host environment.
    pub env: Vec<(String, String)>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Scratch file deleted after the run regardless of outcome (the
    /// profile backend's generated profile lives here).
    pub cleanup_file: Option<PathBuf>,
    /// Container image this invocation runs in, for the pull-before-use
    /// check. Only the container backend sets it.
    pub image: Option<String>,
}

impl NativeCommand {
    /// An invocation that runs the command directly, unwrapped.
    pub fn passthrough(command: &str, args: &[String]) -> Self {
        Self {
            program: command.to_string(),
            args: args.to_vec(),
            ..Default::default()
        }
    }

    /// Builder: add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Outcome of one spawned invocation.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Spawn the invocation and wait for it to finish.
///
/// On timeout the child's process group receives SIGTERM, then after
/// [`TERMINATE_GRACE`] a SIGKILL; the escalation is always two-step. The
/// scratch file, if any, is deleted on every path out of this function.
pub async fn run(
    cmd: &NativeCommand,
    timeout: Option<Duration>,
    limiter: Option<&ResourceLimiter>,
) -> Result<SpawnOutcome> {
    let result = run_inner(cmd, timeout, limiter).await;

    if let Some(scratch) = &cmd.cleanup_file {
        if let Err(e) = std::fs::remove_file(scratch) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %scratch.display(), error = %e, "scratch file not removed");
            }
        }
    }

    result
}

async fn run_inner(
    cmd: &NativeCommand,
    timeout: Option<Duration>,
    limiter: Option<&ResourceLimiter>,
) -> Result<SpawnOutcome> {
    let start = Instant::now();

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = &cmd.cwd {
        command.current_dir(cwd);
    }

    command.env_clear();
    command.envs(build_safe_environment(&cmd.env));

    // Put the child in its own process group so the terminate signal
    // reaches the whole tree it spawns.
    #[cfg(unix)]
    {
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(|e| ExecError::Spawn {
        program: cmd.program.clone(),
        source: e,
    })?;

    if let (Some(limiter), Some(pid)) = (limiter, child.id()) {
        limiter.attach(pid);
    }

    // Drain both pipes off-task so a full pipe never deadlocks the child,
    // and so output flushed during the grace period is still captured.
    let stdout_task = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    let (status, timed_out) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                tracing::warn!(
                    program = %cmd.program,
                    timeout_ms = limit.as_millis() as u64,
                    "execution timed out, terminating"
                );
                terminate(&child);
                match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                    Ok(status) => (status?, true),
                    Err(_) => {
                        child.kill().await.ok();
                        (child.wait().await?, true)
                    }
                }
            }
        },
        None => (child.wait().await?, false),
    };

    let stdout = collect_output(stdout_task).await;
    let stderr = collect_output(stderr_task).await;

    Ok(SpawnOutcome {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: start.elapsed(),
        timed_out,
    })
}

/// Send the graceful terminate signal to the child's process group.
fn terminate(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

async fn collect_output(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let bytes = match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };
    truncate_output(&bytes)
}

fn truncate_output(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() > MAX_OUTPUT_BYTES {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= MAX_OUTPUT_BYTES)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!(
            "{}...\n[Output truncated, {} bytes total]",
            &s[..cut],
            s.len()
        )
    } else {
        s.into_owned()
    }
}

/// Inherit the host environment minus sensitive variables, then apply the
/// invocation's own entries on top.
fn build_safe_environment(extra: &[(String, String)]) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| {
            let key_upper = key.to_uppercase();
            !SENSITIVE_PATTERNS
                .iter()
                .any(|pattern| key_upper.contains(pattern))
        })
        .collect();

    for (key, value) in extra {
        env.insert(key.clone(), value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_environment_filters_sensitive() {
        unsafe {
            std::env::set_var("CLAUDE_TEST_API_KEY", "sekrit");
            std::env::set_var("CLAUDE_TEST_PLAIN", "visible");
        }

        let env = build_safe_environment(&[]);
        assert!(!env.contains_key("CLAUDE_TEST_API_KEY"));
        assert_eq!(env.get("CLAUDE_TEST_PLAIN").map(String::as_str), Some("visible"));

        unsafe {
            std::env::remove_var("CLAUDE_TEST_API_KEY");
            std::env::remove_var("CLAUDE_TEST_PLAIN");
        }
    }

    #[test]
    fn test_extra_env_overrides_host() {
        let env = build_safe_environment(&[("CLAUDE_TEST_EXTRA".to_string(), "1".to_string())]);
        assert_eq!(env.get("CLAUDE_TEST_EXTRA").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_truncate_output_under_limit() {
        assert_eq!(truncate_output(b"hello"), "hello");
    }

    #[test]
    fn test_truncate_output_over_limit() {
        let big = vec![b'x'; MAX_OUTPUT_BYTES + 10];
        let truncated = truncate_output(&big);
        assert!(truncated.contains("[Output truncated"));
        assert!(truncated.len() < big.len() + 64);
    }

    #[cfg(unix)]
    mod spawn_tests {
        use super::*;

        #[tokio::test]
        async fn test_run_captures_output() {
            let cmd = NativeCommand::passthrough("echo", &["hello".to_string()]);
            let outcome = run(&cmd, None, None).await.unwrap();

            assert_eq!(outcome.exit_code, 0);
            assert_eq!(outcome.stdout.trim(), "hello");
            assert!(!outcome.timed_out);
        }

        #[tokio::test]
        async fn test_run_missing_program_is_spawn_error() {
            let cmd = NativeCommand::passthrough("definitely-not-a-real-binary", &[]);
            let err = run(&cmd, None, None).await.unwrap_err();
            assert!(matches!(err, ExecError::Spawn { .. }));
            assert!(err.triggers_fallback());
        }

        #[tokio::test]
        async fn test_run_timeout_two_step_kill() {
            let cmd = NativeCommand::passthrough("sleep", &["5".to_string()]);
            let start = Instant::now();
            let outcome = run(&cmd, Some(Duration::from_millis(100)), None)
                .await
                .unwrap();

            assert!(outcome.timed_out);
            assert_ne!(outcome.exit_code, 0);
            // Timeout plus grace period, nowhere near the 5s sleep.
            assert!(start.elapsed() < Duration::from_secs(3));
        }

        #[tokio::test]
        async fn test_run_env_reaches_child() {
            let cmd = NativeCommand::passthrough(
                "sh",
                &["-c".to_string(), "echo $CLAUDE_SPAWN_TEST".to_string()],
            )
            .with_env("CLAUDE_SPAWN_TEST", "from-engine");

            let outcome = run(&cmd, None, None).await.unwrap();
            assert_eq!(outcome.stdout.trim(), "from-engine");
        }

        #[tokio::test]
        async fn test_cleanup_file_removed_after_run() {
            let scratch = tempfile::NamedTempFile::new().unwrap();
            let path = scratch.into_temp_path().keep().unwrap();
            assert!(path.exists());

            let mut cmd = NativeCommand::passthrough("true", &[]);
            cmd.cleanup_file = Some(path.clone());
            run(&cmd, None, None).await.unwrap();

            assert!(!path.exists());
        }
    }
}
