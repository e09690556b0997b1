//! Resource limit specifications.
//!
//! A [`ResourceLimits`] value describes the ceilings a caller wants applied
//! to one sandboxed invocation. Every field is optional; an absent field
//! means "not constrained by this engine" (the OS default still applies).
//! Enforcement strength depends on the host mechanism and is reported back
//! by the executor, never assumed here.

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Resource ceilings for a single sandboxed invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResourceLimits {
    /// Maximum resident memory in bytes.
    pub max_memory: Option<u64>,
    /// CPU ceiling as a percentage of one core (0-100).
    pub max_cpu: Option<u8>,
    /// Maximum number of processes/threads in the sandbox.
    pub max_processes: Option<u32>,
    /// Maximum size of any file the sandbox may create, in bytes.
    pub max_file_size: Option<u64>,
    /// Wall-clock execution ceiling in milliseconds.
    pub max_execution_time: Option<u64>,
    /// Maximum number of open file descriptors.
    pub max_file_descriptors: Option<u32>,
}

impl ResourceLimits {
    /// Limits with every field unset.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Whether any ceiling is configured at all.
    pub fn is_constrained(&self) -> bool {
        self.max_memory.is_some()
            || self.max_cpu.is_some()
            || self.max_processes.is_some()
            || self.max_file_size.is_some()
            || self.max_execution_time.is_some()
            || self.max_file_descriptors.is_some()
    }

    /// Builder: set the memory ceiling from a memory-size string.
    pub fn with_memory(mut self, size: &str) -> Result<Self> {
        self.max_memory = Some(parse_memory_string(size)?);
        Ok(self)
    }

    /// Builder: set the CPU ceiling as a percentage of one core.
    pub fn with_cpu_percent(mut self, percent: u8) -> Self {
        self.max_cpu = Some(percent.min(100));
        self
    }

    /// Builder: set the wall-clock ceiling in milliseconds.
    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.max_execution_time = Some(ms);
        self
    }

    /// Validate field ranges. Zero ceilings are rejected because they would
    /// make every invocation fail immediately.
    pub fn validate(&self) -> Result<()> {
        if let Some(cpu) = self.max_cpu {
            if cpu == 0 || cpu > 100 {
                return Err(PolicyError::invalid_config(
                    "max-cpu",
                    format!("must be in 1..=100, got {cpu}"),
                ));
            }
        }
        if self.max_memory == Some(0) {
            return Err(PolicyError::invalid_config("max-memory", "must be non-zero"));
        }
        if self.max_processes == Some(0) {
            return Err(PolicyError::invalid_config(
                "max-processes",
                "must be non-zero",
            ));
        }
        if self.max_file_descriptors == Some(0) {
            return Err(PolicyError::invalid_config(
                "max-file-descriptors",
                "must be non-zero",
            ));
        }
        if self.max_execution_time == Some(0) {
            return Err(PolicyError::invalid_config(
                "max-execution-time",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Parse a memory-size string into bytes.
///
/// Accepts `<number>[kmgt]?`, case-insensitive. A unitless number is raw
/// bytes: `"512m"` is 536870912, `"1G"` is 1073741824, `"100"` is 100.
pub fn parse_memory_string(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(PolicyError::MalformedMemorySize(input.to_string()));
    }

    let (digits, suffix) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| PolicyError::MalformedMemorySize(input.to_string()))?;

    let multiplier: u64 = match suffix.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        "t" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(PolicyError::MalformedMemorySize(input.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| PolicyError::MalformedMemorySize(input.to_string()))
}
