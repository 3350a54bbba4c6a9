use crate::config::types::{ExecutionContext, LimitSnapshot, Result, SandboxError};
/// Sandbox configuration loading from scriptbox.json
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MAX_STACK_BYTES: usize = 1024 * 1024;
pub const DEFAULT_TIMEOUT_CAP_MS: u64 = 5_000;
pub const DEFAULT_INTERVAL_CAP_MS: u64 = 1_000;
pub const DEFAULT_MAX_OUTPUT_ENTRIES: usize = 10_000;

/// Deadline and heap limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Deadline used when a context gives none (or 0)
    pub default_timeout_ms: u64,
    /// Ceiling applied to a context's requested deadline
    pub max_timeout_ms: u64,
    /// Engine heap ceiling used when a context gives none; `None` disables it
    pub default_memory_limit_bytes: Option<u64>,
    /// Engine native stack ceiling
    pub max_stack_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
            default_memory_limit_bytes: Some(DEFAULT_MEMORY_LIMIT_BYTES),
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
        }
    }
}

/// Host timer clamps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    /// Upper clamp for `setTimeout` delays
    pub timeout_cap_ms: u64,
    /// Upper clamp for `setInterval` periods
    pub interval_cap_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            timeout_cap_ms: DEFAULT_TIMEOUT_CAP_MS,
            interval_cap_ms: DEFAULT_INTERVAL_CAP_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Non-error entries kept per run
    pub max_output_entries: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_output_entries: DEFAULT_MAX_OUTPUT_ENTRIES,
        }
    }
}

/// Full scriptbox.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub limits: LimitsConfig,
    pub timers: TimerConfig,
    pub output: OutputConfig,
    /// Reject contexts that ask for network or filesystem access instead of warning
    pub strict_mode: bool,
}

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| SandboxError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SandboxConfig = serde_json::from_str(&config_content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        crate::config::validator::validate_config(&config)?;
        Ok(config)
    }

    /// Deadline for a run; a missing or zero timeout means the default.
    /// Requests above `max_timeout_ms` are clamped to it.
    pub fn effective_timeout(&self, context: &ExecutionContext) -> Duration {
        let millis = context
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(self.limits.default_timeout_ms);
        Duration::from_millis(millis.min(self.limits.max_timeout_ms))
    }

    pub fn effective_memory_limit(&self, context: &ExecutionContext) -> Option<u64> {
        context
            .memory_limit
            .or(self.limits.default_memory_limit_bytes)
    }

    pub fn timeout_cap(&self) -> Duration {
        Duration::from_millis(self.timers.timeout_cap_ms)
    }

    pub fn interval_cap(&self) -> Duration {
        Duration::from_millis(self.timers.interval_cap_ms)
    }

    pub fn limit_snapshot(&self, context: &ExecutionContext) -> LimitSnapshot {
        LimitSnapshot {
            timeout_ms: self.effective_timeout(context).as_millis() as u64,
            memory_limit_bytes: self.effective_memory_limit(context),
            max_stack_bytes: self.limits.max_stack_bytes,
            max_output_entries: self.output.max_output_entries,
        }
    }
}
