//! Network access policy.
//!
//! Mirrors the filesystem policy shape: an ordered list of domain patterns
//! evaluated first-match-wins, with a default-deny posture unless the
//! enclosing config grants blanket network access. Patterns are exact
//! domains or leading-wildcard subdomain patterns (`*.example.com`, which
//! matches any subdomain depth but not the apex domain).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// One ordered domain pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    /// Exact domain or `*.suffix` wildcard.
    pub pattern: String,
    /// Whether a match allows or denies the connection.
    pub allow: bool,
}

impl DomainRule {
    /// An allow rule.
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            allow: true,
        }
    }

    /// A deny rule.
    pub fn deny(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            allow: false,
        }
    }

    fn matches(&self, host: &str) -> bool {
        if let Some(suffix) = self.pattern.strip_prefix("*.") {
            // Subdomains only, never the apex itself.
            return host
                .strip_suffix(suffix)
                .is_some_and(|rest| rest.ends_with('.') && rest.len() > 1);
        }
        self.pattern.eq_ignore_ascii_case(host)
    }
}

/// Request counters kept for observability.
#[derive(Debug, Default)]
pub struct NetworkStats {
    attempted: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatsSnapshot {
    pub attempted: u64,
    pub allowed: u64,
    pub denied: u64,
}

impl NetworkStats {
    fn record(&self, allowed: bool) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

impl Clone for NetworkStats {
    fn clone(&self) -> Self {
        let snap = self.snapshot();
        Self {
            attempted: AtomicU64::new(snap.attempted),
            allowed: AtomicU64::new(snap.allowed),
            denied: AtomicU64::new(snap.denied),
        }
    }
}

/// Ordered outbound-connection policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Rules in evaluation order.
    pub rules: Vec<DomainRule>,
    /// Blanket grant applied when no rule matches. Set from the config's
    /// `network_access` flag; the default posture is deny.
    #[serde(default)]
    pub allow_unmatched: bool,
    #[serde(skip)]
    stats: NetworkStats,
}

impl NetworkPolicy {
    /// A policy that denies everything.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// A policy that allows everything not explicitly denied.
    pub fn allow_all() -> Self {
        Self {
            allow_unmatched: true,
            ..Self::default()
        }
    }

    /// A default-deny policy with an explicit allow list.
    pub fn allow_list(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            rules: patterns.into_iter().map(DomainRule::allow).collect(),
            ..Self::default()
        }
    }

    /// Evaluate a host against the rule list and record the outcome.
    pub fn matches(&self, host: &str) -> bool {
        let allowed = self
            .rules
            .iter()
            .find(|r| r.matches(host))
            .map(|r| r.allow)
            .unwrap_or(self.allow_unmatched);

        self.stats.record(allowed);
        allowed
    }

    /// Counter snapshot (attempted/allowed/denied).
    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Patterns from allow rules, consumed by backends that can express a
    /// host allow list natively.
    pub fn allowed_domains(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.allow)
            .map(|r| r.pattern.as_str())
            .collect()
    }
}
