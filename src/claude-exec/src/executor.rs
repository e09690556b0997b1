//! Sandbox executor.
//!
//! Drives one invocation through the state machine
//! `SELECT_BACKEND → BUILD_INVOCATION → SPAWN → MONITOR → COLLECT_OUTPUT →
//! CLEANUP → RETURN`. Any failure up through the spawn takes the fallback
//! edge to the next backend in priority order, terminating at direct
//! execution. The executor never raises for "no sandbox available": that
//! is a reportable condition on the result, and callers inspect
//! `sandboxed`/`sandbox_type` to learn what actually ran. The engine
//! never claims isolation it did not provide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use claude_sandbox::{SandboxCapabilities, SandboxConfig, SandboxType, presets};

use crate::backend::{IsolationBackend, backend_chain};
use crate::capability::CapabilityProbe;
use crate::error::{ExecError, Result};
use crate::limits::{EnforcementClass, ResourceLimiter};

/// Exit code reported when no link of the chain could spawn the command.
const EXIT_SPAWN_FAILURE: i32 = 127;

/// One command in a sequence or parallel batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Uniform result of one invocation, whatever mechanism ended up running
/// it. `sandbox_type` always reflects the mechanism actually used, never
/// the one requested; `sandboxed` is false whenever the requested type
/// was not honored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub sandboxed: bool,
    pub sandbox_type: SandboxType,
    /// How strongly the configured resource limits were enforced.
    pub enforcement: EnforcementClass,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecutorResult {
    /// Whether the command exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes commands under the strongest isolation the host provides,
/// degrading deterministically when a mechanism is missing.
pub struct SandboxExecutor {
    probe: Arc<CapabilityProbe>,
    backends: Vec<Box<dyn IsolationBackend>>,
    workdir: PathBuf,
}

impl SandboxExecutor {
    /// Executor with a fresh host probe.
    pub fn new() -> Self {
        Self::with_probe(Arc::new(CapabilityProbe::new()))
    }

    /// Executor with a caller-supplied probe. Tests pass a pinned probe;
    /// production owners share one probe across executors so detection
    /// runs once per process.
    pub fn with_probe(probe: Arc<CapabilityProbe>) -> Self {
        Self {
            probe,
            backends: backend_chain(),
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    /// Builder: set the working directory commands run in.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// The probe's capability answer.
    pub fn capabilities(&self) -> SandboxCapabilities {
        self.probe.capabilities()
    }

    /// The strongest isolation mechanism available right now.
    pub fn detect_best_sandbox(&self) -> SandboxType {
        let caps = self.capabilities();
        self.backends
            .iter()
            .find(|b| b.available(&caps))
            .map(|b| b.kind())
            .unwrap_or(SandboxType::None)
    }

    /// Run one command under the configured sandbox.
    ///
    /// The only error this returns is config validation, raised before
    /// any process work. Everything else (unavailable backends, spawn
    /// failures, image pulls, timeouts) is folded into the returned
    /// [`ExecutorResult`].
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
    ) -> Result<ExecutorResult> {
        // Paths are normalized to absolute form before anything looks at
        // them, validation included.
        let mut config = config.clone();
        config.normalize_paths()?;

        let validation = presets::validate(&config);
        if !validation.valid {
            return Err(ExecError::ConfigValidation {
                errors: validation.errors,
            });
        }

        let caps = self.capabilities();
        let requested = config.effective_type();
        let limits = config.limits();
        let timeout = limits.max_execution_time.map(Duration::from_millis);
        let limiter = limits
            .is_constrained()
            .then(|| ResourceLimiter::new(limits.clone()));

        // The chain starts at the requested mechanism and only ever
        // weakens from there.
        let start = self
            .backends
            .iter()
            .position(|b| b.kind() == requested)
            .unwrap_or(0);

        let mut outcome = None;
        let mut used: Option<&dyn IsolationBackend> = None;
        let mut last_error = None;

        for backend in &self.backends[start..] {
            if !backend.available(&caps) {
                tracing::debug!(backend = backend.name(), "backend unavailable, skipping");
                continue;
            }

            let invocation =
                match backend.build_invocation(command, args, &config, &self.workdir) {
                    Ok(invocation) => invocation,
                    Err(e) => {
                        tracing::warn!(
                            backend = backend.name(),
                            error = %e,
                            "invocation build failed, falling back"
                        );
                        last_error = Some(e);
                        continue;
                    }
                };

            // Container invocations carry their limits as runtime flags;
            // everything else goes through the limiter.
            let (invocation, limiter_ref) = if backend.kind() == SandboxType::Container {
                (invocation, None)
            } else {
                let wrapped = match &limiter {
                    Some(l) => l.wrap_command(invocation),
                    None => invocation,
                };
                (wrapped, limiter.as_ref())
            };

            tracing::info!(backend = backend.name(), command, "spawning");
            match backend.execute(invocation, timeout, limiter_ref).await {
                Ok(result) => {
                    outcome = Some(result);
                    used = Some(backend.as_ref());
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        error = %e,
                        "backend failed, falling back"
                    );
                    last_error = Some(e);
                }
            }
        }

        // Unconditional cleanup, error paths included.
        if let Some(limiter) = &limiter {
            limiter.teardown();
        }

        let used_type = used.map(|b| b.kind()).unwrap_or(SandboxType::None);
        let sandboxed = used_type == requested && used_type.is_sandboxed();
        if requested.is_sandboxed() && !sandboxed {
            tracing::warn!(
                requested = %requested,
                actual = %used_type,
                "requested isolation was not honored"
            );
        }

        let enforcement = if !limits.is_constrained() {
            EnforcementClass::Unenforced
        } else if used_type == SandboxType::Container {
            EnforcementClass::Hard
        } else {
            limiter
                .as_ref()
                .map(|l| l.enforcement())
                .unwrap_or(EnforcementClass::Unenforced)
        };

        let result = match outcome {
            Some(outcome) => ExecutorResult {
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                sandboxed,
                sandbox_type: used_type,
                enforcement,
                duration: outcome.duration,
                timed_out: outcome.timed_out,
            },
            // Even the direct spawn failed: the command itself is broken.
            // Still a result, not an error.
            None => ExecutorResult {
                exit_code: EXIT_SPAWN_FAILURE,
                stdout: String::new(),
                stderr: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no backend could run the command".to_string()),
                sandboxed: false,
                sandbox_type: SandboxType::None,
                enforcement,
                duration: Duration::ZERO,
                timed_out: false,
            },
        };

        Ok(result)
    }

    /// Run commands serially, stopping at the first non-zero exit. The
    /// returned results are in submission order and cover only the
    /// commands that actually ran.
    pub async fn execute_sequence(
        &self,
        commands: &[CommandSpec],
        config: &SandboxConfig,
    ) -> Result<Vec<ExecutorResult>> {
        let mut results = Vec::with_capacity(commands.len());
        for spec in commands {
            let result = self.execute(&spec.command, &spec.args, config).await?;
            let failed = !result.success();
            results.push(result);
            if failed {
                break;
            }
        }
        Ok(results)
    }

    /// Run commands concurrently. Output order matches input order
    /// regardless of completion order, and every command's result is
    /// returned whether or not its neighbors failed.
    pub async fn execute_parallel(
        &self,
        commands: &[CommandSpec],
        config: &SandboxConfig,
    ) -> Result<Vec<ExecutorResult>> {
        futures::future::try_join_all(
            commands
                .iter()
                .map(|spec| self.execute(&spec.command, &spec.args, config)),
        )
        .await
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new()
    }
}
