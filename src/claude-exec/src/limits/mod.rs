//! Cross-platform resource limiting.
//!
//! A [`ResourceLimiter`] is created per invocation when limits are
//! configured and torn down unconditionally after the child exits. The
//! mechanism is picked by host capability: cgroup v2 where available
//! (hard enforcement), a `ulimit` subshell on other POSIX hosts
//! (best-effort), advisory-only on macOS. The applied strength is exposed
//! as an [`EnforcementClass`] so callers never assume a guarantee the
//! host cannot provide.
//!
//! Exceedance checking is advisory: [`ResourceLimiter::is_limit_exceeded`]
//! reads current usage and compares, it never kills. cgroup and container
//! hard limits kill at the kernel/runtime level independent of this check.

pub mod cgroup;
pub mod rlimit;

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use claude_sandbox::ResourceLimits;

use crate::spawn::NativeCommand;
use cgroup::CgroupLimiter;

/// How strongly the applied limits are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforcementClass {
    /// Kernel or container runtime kills on exceedance.
    Hard,
    /// `ulimit` constraints on the new process tree only.
    BestEffort,
    /// Ceilings are checked and reported, not enforced.
    Advisory,
    /// No limits configured or no mechanism available.
    #[default]
    Unenforced,
}

impl fmt::Display for EnforcementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementClass::Hard => write!(f, "hard"),
            EnforcementClass::BestEffort => write!(f, "best-effort"),
            EnforcementClass::Advisory => write!(f, "advisory"),
            EnforcementClass::Unenforced => write!(f, "unenforced"),
        }
    }
}

/// Result of an advisory limit poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitStatus {
    pub exceeded: bool,
    pub reason: Option<String>,
}

/// Current usage of the monitored process tree, where measurable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub memory_bytes: Option<u64>,
    pub cpu_usec: Option<u64>,
    pub pids: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mechanism {
    Cgroup,
    Ulimit,
    Advisory,
    None,
}

/// Per-invocation limit applier and monitor.
#[derive(Debug)]
pub struct ResourceLimiter {
    limits: ResourceLimits,
    mechanism: Mechanism,
    /// Set once a cgroup has actually been created for the child.
    cgroup: Mutex<Option<CgroupLimiter>>,
    /// Downgraded if attaching fails at runtime.
    degraded: Mutex<Option<EnforcementClass>>,
}

impl ResourceLimiter {
    /// Pick the strongest mechanism the host offers for these limits.
    pub fn new(limits: ResourceLimits) -> Self {
        let mechanism = if !limits.is_constrained() {
            Mechanism::None
        } else if cgroup::available() {
            Mechanism::Cgroup
        } else if cfg!(target_os = "macos") {
            Mechanism::Advisory
        } else if cfg!(unix) {
            Mechanism::Ulimit
        } else {
            Mechanism::None
        };

        Self {
            limits,
            mechanism,
            cgroup: Mutex::new(None),
            degraded: Mutex::new(None),
        }
    }

    /// The configured ceilings.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// The enforcement strength this limiter provides.
    pub fn enforcement(&self) -> EnforcementClass {
        if let Some(downgraded) = *self.degraded.lock() {
            return downgraded;
        }
        match self.mechanism {
            Mechanism::Cgroup => EnforcementClass::Hard,
            Mechanism::Ulimit => EnforcementClass::BestEffort,
            Mechanism::Advisory => EnforcementClass::Advisory,
            Mechanism::None => EnforcementClass::Unenforced,
        }
    }

    /// Wrap an invocation with the `ulimit` subshell when that is the
    /// active mechanism. Must run before spawn; `ulimit` cannot be
    /// applied to a live process.
    pub fn wrap_command(&self, cmd: NativeCommand) -> NativeCommand {
        match self.mechanism {
            Mechanism::Ulimit => rlimit::wrap_with_ulimit(cmd, &self.limits),
            _ => cmd,
        }
    }

    /// Attach the spawned child. Only the cgroup mechanism acts here; a
    /// failure downgrades the reported enforcement instead of surfacing,
    /// because the child is already running.
    pub fn attach(&self, pid: u32) {
        if self.mechanism != Mechanism::Cgroup {
            return;
        }

        match CgroupLimiter::create(pid, &self.limits).and_then(|cg| {
            cg.add_process(pid)?;
            Ok(cg)
        }) {
            Ok(cg) => {
                *self.cgroup.lock() = Some(cg);
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "cgroup attach failed, limits unenforced");
                *self.degraded.lock() = Some(EnforcementClass::Unenforced);
            }
        }
    }

    /// Read current usage where the mechanism can measure it.
    pub fn usage(&self) -> ResourceUsage {
        match &*self.cgroup.lock() {
            Some(cg) => {
                let u = cg.usage();
                ResourceUsage {
                    memory_bytes: u.memory_bytes,
                    cpu_usec: u.cpu_usec,
                    pids: u.pids,
                }
            }
            None => ResourceUsage::default(),
        }
    }

    /// Polled, advisory exceedance check: compares current usage to the
    /// configured ceilings. It does not kill; the caller decides what to
    /// do with the answer.
    pub fn is_limit_exceeded(&self) -> LimitStatus {
        let usage = self.usage();

        if let (Some(current), Some(max)) = (usage.memory_bytes, self.limits.max_memory) {
            if current >= max {
                return LimitStatus {
                    exceeded: true,
                    reason: Some(format!("memory {current} >= limit {max}")),
                };
            }
        }
        if let (Some(current), Some(max)) = (usage.pids, self.limits.max_processes) {
            if current > u64::from(max) {
                return LimitStatus {
                    exceeded: true,
                    reason: Some(format!("pids {current} > limit {max}")),
                };
            }
        }

        LimitStatus::default()
    }

    /// Tear down whatever the limiter created. Called unconditionally
    /// after the child exits, including on error paths.
    pub fn teardown(&self) {
        if let Some(cg) = self.cgroup.lock().take() {
            cg.remove();
        }
    }
}

impl Drop for ResourceLimiter {
    fn drop(&mut self) {
        self.teardown();
    }
}
