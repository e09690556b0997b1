//! Host capability probing.
//!
//! A [`CapabilityProbe`] answers "which isolation mechanisms can this host
//! actually provide" exactly once per probe instance, caching the answer
//! until [`refresh`](CapabilityProbe::refresh) is called. The executor's
//! owner constructs one and passes it in, so tests substitute a pinned
//! probe instead of mutating process-wide state. Reads are race-free under
//! concurrent parallel execution.

use std::path::Path;
use std::process::Command;

use parking_lot::RwLock;

use claude_sandbox::SandboxCapabilities;

use crate::limits::cgroup;

/// Helper binary for Linux namespace sandboxing.
pub const NAMESPACE_HELPER: &str = "bwrap";

/// macOS profile-based sandbox runner.
pub const PROFILE_RUNNER: &str = "/usr/bin/sandbox-exec";

/// Container runtime CLI.
pub const CONTAINER_RUNTIME: &str = "docker";

/// Lazily-computed, explicitly-refreshable host capability cache.
#[derive(Debug, Default)]
pub struct CapabilityProbe {
    cached: RwLock<Option<SandboxCapabilities>>,
    /// Pinned probes never re-detect; used by tests.
    pinned: bool,
}

impl CapabilityProbe {
    /// A probe that detects capabilities on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe pinned to a fixed answer. `refresh()` keeps the pin.
    pub fn pinned(caps: SandboxCapabilities) -> Self {
        Self {
            cached: RwLock::new(Some(caps)),
            pinned: true,
        }
    }

    /// The host's capabilities, detected at most once.
    pub fn capabilities(&self) -> SandboxCapabilities {
        if let Some(caps) = *self.cached.read() {
            return caps;
        }

        let mut slot = self.cached.write();
        // Another caller may have won the write race.
        if let Some(caps) = *slot {
            return caps;
        }

        let caps = Self::detect();
        *slot = Some(caps);
        caps
    }

    /// Drop the cached answer and re-detect.
    pub fn refresh(&self) -> SandboxCapabilities {
        if self.pinned {
            return self.capabilities();
        }
        let caps = Self::detect();
        *self.cached.write() = Some(caps);
        caps
    }

    fn detect() -> SandboxCapabilities {
        let namespace = cfg!(target_os = "linux") && which::which(NAMESPACE_HELPER).is_ok();
        let profile = cfg!(target_os = "macos") && Path::new(PROFILE_RUNNER).exists();
        let container = container_runtime_usable();
        let resource_limits = cgroup::available() || cfg!(unix);

        let caps = SandboxCapabilities {
            namespace,
            profile,
            container,
            resource_limits,
        };
        tracing::debug!(?caps, "probed host sandbox capabilities");
        caps
    }
}

/// Whether the container runtime CLI is present and its daemon reachable.
fn container_runtime_usable() -> bool {
    if which::which(CONTAINER_RUNTIME).is_err() {
        return false;
    }
    Command::new(CONTAINER_RUNTIME)
        .arg("info")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_probe_survives_refresh() {
        let caps = SandboxCapabilities {
            namespace: true,
            profile: false,
            container: true,
            resource_limits: true,
        };
        let probe = CapabilityProbe::pinned(caps);

        assert_eq!(probe.capabilities(), caps);
        assert_eq!(probe.refresh(), caps);
        assert_eq!(probe.capabilities(), caps);
    }

    #[test]
    fn test_detection_is_cached() {
        let probe = CapabilityProbe::new();
        let first = probe.capabilities();
        let second = probe.capabilities();
        assert_eq!(first, second);
    }

    #[test]
    fn test_refresh_recomputes() {
        let probe = CapabilityProbe::new();
        let before = probe.capabilities();
        // Nothing changed on the host, so the answer is stable; this
        // exercises the invalidation path itself.
        let after = probe.refresh();
        assert_eq!(before, after);
    }
}
