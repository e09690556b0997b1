//! cgroup v2 resource control.
//!
//! One cgroup directory is created per sandboxed invocation at
//! `<cgroup-root>/claude-sandbox-<pid>/`. Limits are written as decimal
//! strings to `memory.max`, `cpu.max` (a `"<quota> <period>"` pair against
//! a 100ms period) and `pids.max`; the target process is attached through
//! `cgroup.procs`. Removal tolerates EBUSY while the process tree drains.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_sandbox::ResourceLimits;

/// cgroup v2 mount point.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// CPU bandwidth period in microseconds (100ms).
const CPU_PERIOD_USEC: u64 = 100_000;

/// Removal retries while the cgroup is still busy.
const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_millis(50);

/// Whether the v2 hierarchy is mounted with the controllers this engine
/// writes, and the current user may actually create groups in it.
/// Probed once per process lifetime.
pub fn available() -> bool {
    static AVAILABLE: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *AVAILABLE.get_or_init(detect)
}

fn detect() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }

    let root = Path::new(CGROUP_ROOT);
    let controllers_ok = fs::read_to_string(root.join("cgroup.controllers"))
        .map(|controllers| controllers.contains("memory") && controllers.contains("pids"))
        .unwrap_or(false);
    if !controllers_ok {
        return false;
    }

    // Readable controllers do not imply write access; prove it by
    // creating and removing a scratch group.
    let scratch = root.join(format!("claude-sandbox-probe-{}", std::process::id()));
    match fs::create_dir(&scratch) {
        Ok(()) => {
            let _ = fs::remove_dir(&scratch);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_dir(&scratch);
            true
        }
        Err(_) => false,
    }
}

/// Usage counters read back from the cgroup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgroupUsage {
    /// `memory.current` in bytes.
    pub memory_bytes: Option<u64>,
    /// `usage_usec` from `cpu.stat`.
    pub cpu_usec: Option<u64>,
    /// `pids.current`.
    pub pids: Option<u64>,
}

/// Handle to one per-invocation cgroup directory.
#[derive(Debug)]
pub struct CgroupLimiter {
    dir: PathBuf,
}

impl CgroupLimiter {
    /// Create the cgroup for `pid` under the standard root and write the
    /// configured ceilings.
    pub fn create(pid: u32, limits: &ResourceLimits) -> io::Result<Self> {
        Self::create_in(Path::new(CGROUP_ROOT), pid, limits)
    }

    /// Create under an explicit root. Split out so tests can target a
    /// scratch directory instead of the live hierarchy.
    pub fn create_in(root: &Path, pid: u32, limits: &ResourceLimits) -> io::Result<Self> {
        let dir = root.join(format!("claude-sandbox-{pid}"));
        fs::create_dir_all(&dir)?;

        if let Some(memory) = limits.max_memory {
            fs::write(dir.join("memory.max"), memory.to_string())?;
        }
        if let Some(cpu) = limits.max_cpu {
            let quota = u64::from(cpu) * CPU_PERIOD_USEC / 100;
            fs::write(dir.join("cpu.max"), format!("{quota} {CPU_PERIOD_USEC}"))?;
        }
        if let Some(pids) = limits.max_processes {
            fs::write(dir.join("pids.max"), pids.to_string())?;
        }

        tracing::debug!(dir = %dir.display(), "created cgroup");
        Ok(Self { dir })
    }

    /// Attach a process to this cgroup.
    pub fn add_process(&self, pid: u32) -> io::Result<()> {
        fs::write(self.dir.join("cgroup.procs"), pid.to_string())
    }

    /// The cgroup directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Read current usage. Missing files read as `None` rather than
    /// failing: a controller may not be enabled in this subtree.
    pub fn usage(&self) -> CgroupUsage {
        CgroupUsage {
            memory_bytes: read_u64(&self.dir.join("memory.current")),
            cpu_usec: read_cpu_stat(&self.dir.join("cpu.stat")),
            pids: read_u64(&self.dir.join("pids.current")),
        }
    }

    /// Remove the cgroup directory, retrying while the kernel still
    /// reports it busy.
    pub fn remove(&self) {
        for attempt in 0..REMOVE_ATTEMPTS {
            match fs::remove_dir(&self.dir) {
                Ok(()) => return,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return,
                Err(e) => {
                    if attempt + 1 == REMOVE_ATTEMPTS {
                        tracing::warn!(
                            dir = %self.dir.display(),
                            error = %e,
                            "failed to remove cgroup"
                        );
                        return;
                    }
                    std::thread::sleep(REMOVE_BACKOFF);
                }
            }
        }
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_cpu_stat(path: &Path) -> Option<u64> {
    let stat = fs::read_to_string(path).ok()?;
    stat.lines()
        .find_map(|line| line.strip_prefix("usage_usec "))
        .and_then(|v| v.trim().parse().ok())
}
