//! Filesystem access policy.
//!
//! A [`FilesystemPolicy`] is an ordered rule list evaluated first-match-wins
//! against normalized absolute paths. Rules match either as subpath prefixes
//! (`/tmp` covers `/tmp/scratch/x`) or as globs (`/home/*/.cache`). A path
//! that matches no rule is denied; the only carve-out is an empty policy,
//! which still permits the policy's own working directory so a default
//! config cannot lock a caller out of its workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use glob::Pattern;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Permission granted to a path by a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPermission {
    /// Read-only access.
    Read,
    /// Read and write access.
    Write,
    /// No access.
    Deny,
}

impl fmt::Display for PathPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPermission::Read => write!(f, "read"),
            PathPermission::Write => write!(f, "write"),
            PathPermission::Deny => write!(f, "deny"),
        }
    }
}

/// One ordered entry in a filesystem policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    /// Subpath prefix or glob pattern, absolute.
    pub pattern: String,
    /// Permission applied when this rule is the first match.
    pub permission: PathPermission,
}

impl PathRule {
    /// Create a new rule.
    pub fn new(pattern: impl Into<String>, permission: PathPermission) -> Self {
        Self {
            pattern: pattern.into(),
            permission,
        }
    }

    /// Whether this rule's pattern uses glob metacharacters.
    fn is_glob(&self) -> bool {
        self.pattern.contains(['*', '?', '['])
    }

    /// Whether this rule matches the given normalized path.
    fn matches(&self, path: &Path) -> bool {
        if self.is_glob() {
            return Pattern::new(&self.pattern)
                .map(|p| p.matches_path(path))
                .unwrap_or(false);
        }

        let prefix = Path::new(&self.pattern);
        path == prefix || path.starts_with(prefix)
    }
}

/// Ordered filesystem access policy, first-match-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemPolicy {
    /// Rules in evaluation order.
    pub rules: Vec<PathRule>,
    /// Anchor for the empty-policy carve-out and for normalizing
    /// relative candidate paths.
    pub workdir: PathBuf,
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

impl FilesystemPolicy {
    /// Create a policy with the given rules, anchored at the process
    /// working directory.
    pub fn new(rules: Vec<PathRule>) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Create a policy anchored at an explicit working directory.
    pub fn with_workdir(rules: Vec<PathRule>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            rules,
            workdir: workdir.into(),
        }
    }

    /// The strict posture: writable working directory, everything else
    /// denied.
    pub fn strict(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let rules = vec![
            PathRule::new(workdir.display().to_string(), PathPermission::Write),
            PathRule::new("/", PathPermission::Deny),
        ];
        Self { rules, workdir }
    }

    /// Evaluate a candidate path against the rule list.
    ///
    /// The path is normalized to absolute form first. Rules are scanned in
    /// order and the first subpath-prefix or glob match decides; no match
    /// means deny, except that an empty policy still grants write access
    /// under [`workdir`](Self::workdir).
    pub fn matches(&self, path: impl AsRef<Path>) -> PathPermission {
        let candidate = self.normalize(path.as_ref());

        for rule in &self.rules {
            if rule.matches(&candidate) {
                return rule.permission;
            }
        }

        if self.rules.is_empty() && candidate.starts_with(&self.workdir) {
            return PathPermission::Write;
        }

        PathPermission::Deny
    }

    /// Merge two policies: `a`'s rules take precedence (evaluated first).
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut rules = a.rules.clone();
        rules.extend(b.rules.iter().cloned());
        Self {
            rules,
            workdir: a.workdir.clone(),
        }
    }

    /// Check the rule list for contradictory overlaps.
    ///
    /// An earlier rule that shadows a later rule with a different
    /// permission is reported as a warning, not a hard error: the ordered
    /// first-match semantics are still well defined.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (i, earlier) in self.rules.iter().enumerate() {
            for later in self.rules.iter().skip(i + 1) {
                if earlier.permission == later.permission {
                    continue;
                }
                if !earlier.is_glob()
                    && !later.is_glob()
                    && Path::new(&later.pattern).starts_with(&earlier.pattern)
                {
                    warnings.push(format!(
                        "rule '{} {}' is shadowed by earlier rule '{} {}'",
                        later.pattern, later.permission, earlier.pattern, earlier.permission,
                    ));
                }
            }
        }

        warnings
    }

    /// Rules granting write access, normalized. Consumed by backends that
    /// need the writable bind/mount set.
    pub fn writable_paths(&self) -> Vec<PathBuf> {
        self.paths_with(PathPermission::Write)
    }

    /// Rules granting read-only access, normalized.
    pub fn read_only_paths(&self) -> Vec<PathBuf> {
        self.paths_with(PathPermission::Read)
    }

    fn paths_with(&self, permission: PathPermission) -> Vec<PathBuf> {
        self.rules
            .iter()
            .filter(|r| r.permission == permission && !r.is_glob())
            .map(|r| self.normalize(Path::new(&r.pattern)))
            .collect()
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        path.absolutize_from(&self.workdir)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Normalize a path to absolute form against the process working directory.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    path.absolutize()
        .map(|p| p.into_owned())
        .map_err(|_| PolicyError::RelativePath(path.display().to_string()))
}
