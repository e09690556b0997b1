//! POSIX `ulimit` fallback.
//!
//! When cgroups are unavailable the limits are expressed as a `ulimit`
//! argument string and prepended to the command through a `/bin/sh -c`
//! subshell. This only constrains the new process tree, is best-effort,
//! and cannot be tightened after the process starts.

use claude_sandbox::ResourceLimits;

use crate::spawn::NativeCommand;

/// Build the `ulimit` argument string for the configured ceilings:
/// `-v` virtual memory in KB, `-f` file size in KB, `-u` process count,
/// `-n` file descriptors, `-t` CPU seconds.
pub fn ulimit_args(limits: &ResourceLimits) -> String {
    let mut parts = Vec::new();

    if let Some(memory) = limits.max_memory {
        parts.push(format!("-v {}", memory / 1024));
    }
    if let Some(file_size) = limits.max_file_size {
        parts.push(format!("-f {}", file_size / 1024));
    }
    if let Some(processes) = limits.max_processes {
        parts.push(format!("-u {processes}"));
    }
    if let Some(fds) = limits.max_file_descriptors {
        parts.push(format!("-n {fds}"));
    }
    if let Some(ms) = limits.max_execution_time {
        parts.push(format!("-t {}", ms.div_ceil(1000)));
    }

    parts.join(" ")
}

/// Wrap an invocation in a `ulimit`-setting subshell. The original
/// command is shell-quoted and `exec`'d so the limits apply to it
/// directly rather than to a lingering shell.
pub fn wrap_with_ulimit(cmd: NativeCommand, limits: &ResourceLimits) -> NativeCommand {
    let args = ulimit_args(limits);
    if args.is_empty() {
        return cmd;
    }

    let quoted = std::iter::once(cmd.program.as_str())
        .chain(cmd.args.iter().map(String::as_str))
        .map(|part| {
            shlex::try_quote(part)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| part.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ");

    NativeCommand {
        program: "/bin/sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!("ulimit {args} 2>/dev/null; exec {quoted}"),
        ],
        ..cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limit_in_kb() {
        let limits = ResourceLimits {
            max_memory: Some(512 * 1024 * 1024),
            ..Default::default()
        };
        assert_eq!(ulimit_args(&limits), format!("-v {}", 512 * 1024));
    }

    #[test]
    fn test_all_flags() {
        let limits = ResourceLimits {
            max_memory: Some(1024 * 1024),
            max_file_size: Some(2048 * 1024),
            max_processes: Some(16),
            max_file_descriptors: Some(64),
            max_execution_time: Some(2500),
            ..Default::default()
        };

        assert_eq!(ulimit_args(&limits), "-v 1024 -f 2048 -u 16 -n 64 -t 3");
    }

    #[test]
    fn test_no_limits_no_args() {
        assert_eq!(ulimit_args(&ResourceLimits::default()), "");
    }

    #[test]
    fn test_wrap_builds_exec_subshell() {
        let cmd = NativeCommand::passthrough("echo", &["hello world".to_string()]);
        let limits = ResourceLimits {
            max_memory: Some(1024 * 1024),
            ..Default::default()
        };

        let wrapped = wrap_with_ulimit(cmd, &limits);
        assert_eq!(wrapped.program, "/bin/sh");
        assert_eq!(wrapped.args[0], "-c");
        assert!(wrapped.args[1].starts_with("ulimit -v 1024"));
        assert!(wrapped.args[1].contains("exec echo 'hello world'"));
    }

    #[test]
    fn test_wrap_without_limits_is_identity() {
        let cmd = NativeCommand::passthrough("true", &[]);
        let wrapped = wrap_with_ulimit(cmd.clone(), &ResourceLimits::default());
        assert_eq!(wrapped.program, cmd.program);
        assert_eq!(wrapped.args, cmd.args);
    }
}
