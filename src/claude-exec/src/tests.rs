//! Tests for the execution engine.
//!
//! Cross-module scenarios:
//! 1. Sequencing and parallel ordering guarantees
//! 2. Timeout escalation timing
//! 3. Fallback determinism under pinned capability probes
//! 4. Enforcement-class reporting

use std::sync::Arc;
use std::time::{Duration, Instant};

use claude_sandbox::{ResourceLimits, SandboxCapabilities, SandboxConfig, SandboxType};

use super::*;

fn direct_only_executor() -> SandboxExecutor {
    SandboxExecutor::with_probe(Arc::new(CapabilityProbe::pinned(
        SandboxCapabilities::default(),
    )))
}

fn echo(text: &str) -> CommandSpec {
    CommandSpec::new("echo", [text])
}

#[cfg(unix)]
mod sequencing_tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let executor = direct_only_executor();
        let commands = vec![
            echo("a"),
            CommandSpec::new("false", Vec::<String>::new()),
            echo("b"),
        ];

        let results = executor
            .execute_sequence(&commands, &SandboxConfig::default())
            .await
            .unwrap();

        // "b" never ran.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].stdout.trim(), "a");
        assert!(results[0].success());
        assert_ne!(results[1].exit_code, 0);
    }

    #[tokio::test]
    async fn test_sequence_runs_all_on_success() {
        let executor = direct_only_executor();
        let commands = vec![echo("1"), echo("2"), echo("3")];

        let results = executor
            .execute_sequence(&commands, &SandboxConfig::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let outputs: Vec<&str> = results.iter().map(|r| r.stdout.trim()).collect();
        assert_eq!(outputs, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_parallel_preserves_input_order() {
        let executor = direct_only_executor();
        // Staggered sleeps so completion order differs from input order.
        let commands = vec![
            CommandSpec::new("sh", ["-c", "sleep 0.2; echo slow"]),
            CommandSpec::new("sh", ["-c", "sleep 0.1; echo medium"]),
            CommandSpec::new("sh", ["-c", "echo fast"]),
        ];

        let results = executor
            .execute_parallel(&commands, &SandboxConfig::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let outputs: Vec<&str> = results.iter().map(|r| r.stdout.trim()).collect();
        assert_eq!(outputs, vec!["slow", "medium", "fast"]);
        assert!(results.iter().all(|r| r.success()));
    }

    #[tokio::test]
    async fn test_parallel_returns_failures_alongside_successes() {
        let executor = direct_only_executor();
        let commands = vec![
            echo("ok"),
            CommandSpec::new("false", Vec::<String>::new()),
            echo("also ok"),
        ];

        let results = executor
            .execute_parallel(&commands, &SandboxConfig::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].success());
        assert!(!results[1].success());
        assert!(results[2].success());
    }
}

#[cfg(unix)]
mod timeout_tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_kills_within_grace_bound() {
        let executor = direct_only_executor();
        let config = SandboxConfig {
            resource_limits: Some(ResourceLimits {
                max_execution_time: Some(100),
                ..Default::default()
            }),
            ..Default::default()
        };

        let start = Instant::now();
        let result = executor
            .execute("sleep", &["5".to_string()], &config)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(result.timed_out);
        assert_ne!(result.exit_code, 0);
        // Roughly timeout + grace period, nowhere near the 5s sleep.
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        assert!(result.duration < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fast_command_unaffected_by_timeout() {
        let executor = direct_only_executor();
        let config = SandboxConfig {
            resource_limits: Some(ResourceLimits {
                max_execution_time: Some(5_000),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = executor
            .execute("echo", &["quick".to_string()], &config)
            .await
            .unwrap();

        assert!(!result.timed_out);
        assert!(result.success());
    }
}

#[cfg(unix)]
mod degradation_tests {
    use super::*;

    #[tokio::test]
    async fn test_type_none_matches_direct_spawn() {
        let executor = direct_only_executor();
        let config = SandboxConfig {
            sandbox_type: SandboxType::None,
            ..Default::default()
        };

        let result = executor
            .execute("echo", &["plain".to_string()], &config)
            .await
            .unwrap();

        assert!(!result.sandboxed);
        assert_eq!(result.sandbox_type, SandboxType::None);
        assert_eq!(result.stdout.trim(), "plain");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_fallback_never_reports_requested_type() {
        // Container requested but unavailable: the result must name what
        // ran, not what was asked for.
        let executor = direct_only_executor();
        let config = SandboxConfig {
            sandbox_type: SandboxType::Container,
            ..Default::default()
        };

        let result = executor
            .execute("echo", &["x".to_string()], &config)
            .await
            .unwrap();

        assert_eq!(result.sandbox_type, SandboxType::None);
        assert!(!result.sandboxed);
    }

    #[tokio::test]
    async fn test_enforcement_class_reported_with_limits() {
        let executor = direct_only_executor();
        let config = SandboxConfig {
            resource_limits: Some(ResourceLimits {
                max_file_descriptors: Some(1024),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = executor
            .execute("echo", &["limited".to_string()], &config)
            .await
            .unwrap();

        assert!(result.success());
        // With limits configured the class is never silently absent.
        assert_ne!(result.enforcement, EnforcementClass::Unenforced);
    }

    #[tokio::test]
    async fn test_no_limits_reports_unenforced() {
        let executor = direct_only_executor();
        let result = executor
            .execute("echo", &["free".to_string()], &SandboxConfig::default())
            .await
            .unwrap();
        assert_eq!(result.enforcement, EnforcementClass::Unenforced);
    }
}

#[cfg(target_os = "linux")]
mod linux_tests {
    use super::*;

    #[tokio::test]
    async fn test_namespace_execution_when_helper_present() {
        let probe = CapabilityProbe::new();
        if !probe.capabilities().namespace {
            eprintln!("bwrap not installed, skipping");
            return;
        }

        let executor = SandboxExecutor::with_probe(Arc::new(probe));
        let config = SandboxConfig {
            sandbox_type: SandboxType::Namespace,
            ..Default::default()
        };

        let result = executor
            .execute("echo", &["inside".to_string()], &config)
            .await
            .unwrap();

        assert!(result.sandboxed);
        assert_eq!(result.sandbox_type, SandboxType::Namespace);
        assert_eq!(result.stdout.trim(), "inside");
    }
}
