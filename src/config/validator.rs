// Config and context validation
// Configuration is validated when loaded; contexts are validated before every run.
// Strict mode turns advisory findings into hard errors.

use crate::config::settings::SandboxConfig;
use crate::config::types::{ExecutionContext, Result, SandboxError};
use log::warn;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate sandbox configuration; any error is fatal
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    let limits = &config.limits;
    if limits.default_timeout_ms == 0 {
        result.add_error("default_timeout_ms cannot be zero".to_string());
    }
    if limits.max_timeout_ms < limits.default_timeout_ms {
        result.add_error(format!(
            "max_timeout_ms ({}) is below default_timeout_ms ({})",
            limits.max_timeout_ms, limits.default_timeout_ms
        ));
    }
    if limits.default_memory_limit_bytes == Some(0) {
        result.add_error("default_memory_limit_bytes cannot be zero".to_string());
    }
    if limits.max_stack_bytes < 64 * 1024 {
        result.add_warning(format!(
            "max_stack_bytes {} is very low (< 64KB), ordinary recursion may fail",
            limits.max_stack_bytes
        ));
    }
    if config.timers.interval_cap_ms == 0 {
        result.add_error("interval_cap_ms cannot be zero".to_string());
    }
    if config.output.max_output_entries == 0 {
        result.add_error("max_output_entries cannot be zero".to_string());
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

/// Validate one run's context against the configuration
pub fn validate_context(
    context: &ExecutionContext,
    config: &SandboxConfig,
) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    if let Some(timeout) = context.timeout {
        if timeout > config.limits.max_timeout_ms {
            let message = format!(
                "timeout {} ms exceeds the maximum of {} ms, clamping",
                timeout, config.limits.max_timeout_ms
            );
            warn!("{}", message);
            result.add_warning(message);
        }
    }

    if let Some(memory_limit) = context.memory_limit {
        if memory_limit == 0 {
            result.add_error("memoryLimit cannot be zero".to_string());
        } else if memory_limit < 1024 * 1024 {
            result.add_warning(format!(
                "memoryLimit {} is very low (< 1MB), the engine may fail to start",
                memory_limit
            ));
        }
    }

    // Nothing in the sandbox can reach the network or the filesystem.
    for (flag, requested) in [
        ("allowNetwork", context.allow_network),
        ("allowFileSystem", context.allow_file_system),
    ] {
        if !requested {
            continue;
        }
        let message = format!("{} is not supported and has no effect", flag);
        if config.strict_mode {
            result.add_error(message);
        } else {
            warn!("{}", message);
            result.add_warning(message);
        }
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(result.errors.join("; ")));
    }

    Ok(result)
}
