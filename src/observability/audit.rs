/// Audit event logging for scriptbox
/// Structured record of every sandbox run for incident review
///
/// - Correlation IDs (run_id, sandbox_id)
/// - Event types: start, end, compile failure, limit violations, rejected contexts
/// - Verdict provenance attached to end-of-run events
use crate::config::types::{Result, SandboxError, VerdictProvenance};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of audit events we track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditEventType {
    // Lifecycle
    ExecutionStart,
    ExecutionEnd,

    // Verdict-bearing failures
    CompileFailure,
    RuntimeException,
    TimeoutExpired,
    MemoryLimitExceeded,
    OutputLimitReached,

    // Context handling
    AdvisoryFlagIgnored,
    ContextRejected,

    EngineFailure,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionStart => AuditSeverity::Low,
            AuditEventType::ExecutionEnd => AuditSeverity::Low,

            AuditEventType::CompileFailure => AuditSeverity::Low,
            AuditEventType::RuntimeException => AuditSeverity::Low,
            AuditEventType::TimeoutExpired => AuditSeverity::Medium,
            AuditEventType::MemoryLimitExceeded => AuditSeverity::High,
            AuditEventType::OutputLimitReached => AuditSeverity::Medium,

            AuditEventType::AdvisoryFlagIgnored => AuditSeverity::Medium,
            AuditEventType::ContextRejected => AuditSeverity::Medium,

            AuditEventType::EngineFailure => AuditSeverity::Critical,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationIds {
    /// Unique identifier of one execute_code call
    pub run_id: String,
    /// Identifier of the sandbox instance that served the run
    pub sandbox_id: String,
}

impl CorrelationIds {
    /// Create new correlation IDs for a run
    pub fn new(sandbox_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            sandbox_id: sandbox_id.to_string(),
        }
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: SystemTime,
    pub details: String,

    pub correlation: Option<CorrelationIds>,
    pub verdict_provenance: Option<VerdictProvenance>,
    pub language: Option<String>,
    pub source_bytes: Option<usize>,
}

impl AuditEvent {
    /// Create a new audit event with default severity
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        let severity = event_type.default_severity();
        Self {
            event_type,
            severity,
            timestamp: SystemTime::now(),
            details,
            correlation: None,
            verdict_provenance: None,
            language: None,
            source_bytes: None,
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_verdict_provenance(mut self, provenance: VerdictProvenance) -> Self {
        self.verdict_provenance = Some(provenance);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_source_bytes(mut self, bytes: usize) -> Self {
        self.source_bytes = Some(bytes);
        self
    }

    /// One JSON line as written to the audit file
    pub fn to_log_entry(&self) -> serde_json::Value {
        let mut log_entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(correlation) = &self.correlation {
            log_entry["correlation"] = serde_json::json!({
                "run_id": correlation.run_id,
                "sandbox_id": correlation.sandbox_id,
            });
        }

        if let Some(verdict_provenance) = &self.verdict_provenance {
            log_entry["verdict_provenance"] = serde_json::to_value(verdict_provenance)
                .unwrap_or_else(|_| serde_json::json!(null));
        }

        if let Some(language) = &self.language {
            log_entry["language"] = serde_json::json!(language);
        }
        if let Some(bytes) = self.source_bytes {
            log_entry["source_bytes"] = serde_json::json!(bytes);
        }

        log_entry
    }
}

/// Audit logger that mirrors events to the log facade and an append-only file
pub struct AuditLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.unwrap_or_else(default_audit_path);

        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    /// Log an audit event
    pub fn log_event(&self, event: AuditEvent) {
        mirror_to_log(&event);

        let log_entry = event.to_log_entry();
        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", log_entry) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    /// Get the audit log file path
    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn default_audit_path() -> PathBuf {
    std::env::temp_dir().join("scriptbox").join("audit.log")
}

fn mirror_to_log(event: &AuditEvent) {
    match event.severity {
        AuditSeverity::Critical | AuditSeverity::High => {
            error!("AUDIT {:?}: {}", event.event_type, event.details);
        }
        AuditSeverity::Medium => {
            warn!("AUDIT {:?}: {}", event.event_type, event.details);
        }
        AuditSeverity::Low => {
            info!("AUDIT {:?}: {}", event.event_type, event.details);
        }
    }
}

/// Global audit logger instance
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit logger
///
/// With no explicit path, falls back to `~/.scriptbox/audit.log` and finally
/// to log-only auditing when no file can be opened.
pub fn init_audit_logger(audit_path: Option<PathBuf>) -> Result<()> {
    match AuditLogger::new(audit_path.clone()) {
        Ok(logger) => {
            if AUDIT_LOGGER.set(logger).is_err() {
                warn!("Audit logger already initialized");
            } else {
                info!("Audit logger initialized");
            }
            Ok(())
        }
        Err(e) if audit_path.is_none() => {
            let fallback = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
                .join(".scriptbox")
                .join("audit.log");

            match AuditLogger::new(Some(fallback.clone())) {
                Ok(logger) => {
                    if AUDIT_LOGGER.set(logger).is_err() {
                        warn!("Audit logger already initialized");
                    } else {
                        warn!(
                            "Audit logger initialized using fallback path: {}",
                            fallback.display()
                        );
                    }
                }
                Err(fallback_err) => {
                    warn!(
                        "Audit log unavailable ({}; fallback {}). Continuing with log-only audit events",
                        e, fallback_err
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Failed to initialize audit logger: {}", e);
            Err(e)
        }
    }
}

/// Log an audit event using the global logger
pub fn log_audit_event(event: AuditEvent) {
    if let Some(logger) = AUDIT_LOGGER.get() {
        logger.log_event(event);
    } else {
        mirror_to_log(&event);
    }
}

/// Convenience functions for common audit events
pub mod events {
    use super::*;

    pub fn execution_start(correlation: CorrelationIds, language: &str, source_bytes: usize) {
        let event = AuditEvent::new(
            AuditEventType::ExecutionStart,
            format!("Execution started: run_id={}", correlation.run_id),
        )
        .with_correlation(correlation)
        .with_language(language)
        .with_source_bytes(source_bytes);

        log_audit_event(event);
    }

    pub fn execution_end(correlation: CorrelationIds, status: &str, provenance: VerdictProvenance) {
        let event = AuditEvent::new(
            AuditEventType::ExecutionEnd,
            format!(
                "Execution ended: run_id={}, status={}, actor={:?}, cause={:?}",
                correlation.run_id, status, provenance.verdict_actor, provenance.verdict_cause
            ),
        )
        .with_correlation(correlation)
        .with_verdict_provenance(provenance);

        log_audit_event(event);
    }

    pub fn compile_failure(correlation: CorrelationIds, message: &str) {
        let event = AuditEvent::new(
            AuditEventType::CompileFailure,
            format!("TypeScript compilation failed: {}", message),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn runtime_exception(correlation: CorrelationIds, message: &str) {
        let event = AuditEvent::new(
            AuditEventType::RuntimeException,
            format!("Uncaught exception: {}", message),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn timeout_expired(correlation: CorrelationIds, used_ms: u64, limit_ms: u64) {
        let event = AuditEvent::new(
            AuditEventType::TimeoutExpired,
            format!(
                "Wall time limit reached: used={} ms, limit={} ms",
                used_ms, limit_ms
            ),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn memory_limit_exceeded(correlation: CorrelationIds, limit_bytes: Option<u64>) {
        let limit = limit_bytes
            .map(|b| format!("{} bytes", b))
            .unwrap_or_else(|| "unbounded".to_string());
        let event = AuditEvent::new(
            AuditEventType::MemoryLimitExceeded,
            format!("Engine heap limit exceeded: limit={}", limit),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn output_limit_reached(correlation: CorrelationIds, dropped: usize, limit: usize) {
        let event = AuditEvent::new(
            AuditEventType::OutputLimitReached,
            format!(
                "Output entry limit reached: dropped={}, limit={}",
                dropped, limit
            ),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn advisory_flag_ignored(correlation: CorrelationIds, flag: &str) {
        let event = AuditEvent::new(
            AuditEventType::AdvisoryFlagIgnored,
            format!("{} requested but not granted", flag),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn context_rejected(correlation: CorrelationIds, reason: &str) {
        let event = AuditEvent::new(
            AuditEventType::ContextRejected,
            format!("Execution context rejected: {}", reason),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }

    pub fn engine_failure(correlation: CorrelationIds, reason: &str) {
        let event = AuditEvent::new(
            AuditEventType::EngineFailure,
            format!("Engine setup failed: {}", reason),
        )
        .with_correlation(correlation);

        log_audit_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LimitSnapshot, VerdictActor, VerdictCause};

    fn provenance() -> VerdictProvenance {
        VerdictProvenance {
            verdict_actor: VerdictActor::Sandbox,
            verdict_cause: VerdictCause::TleDeadline,
            wall_time_used_ms: 1001,
            limit_snapshot: LimitSnapshot::default(),
        }
    }

    #[test]
    fn test_correlation_ids_creation() {
        let a = CorrelationIds::new("sandbox-1");
        let b = CorrelationIds::new("sandbox-1");
        assert_eq!(a.sandbox_id, "sandbox-1");
        assert!(!a.run_id.is_empty());
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            AuditEventType::ExecutionStart.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            AuditEventType::EngineFailure.default_severity(),
            AuditSeverity::Critical
        );
        assert_eq!(
            AuditEventType::MemoryLimitExceeded.default_severity(),
            AuditSeverity::High
        );
    }

    #[test]
    fn test_log_entry_fields() {
        let event = AuditEvent::new(AuditEventType::ExecutionEnd, "done".to_string())
            .with_correlation(CorrelationIds::new("sb"))
            .with_verdict_provenance(provenance())
            .with_language("typescript")
            .with_severity(AuditSeverity::Medium);

        let entry = event.to_log_entry();
        assert_eq!(entry["event_type"], "ExecutionEnd");
        assert_eq!(entry["severity"], "Medium");
        assert_eq!(entry["correlation"]["sandbox_id"], "sb");
        assert_eq!(entry["language"], "typescript");
        assert_eq!(entry["verdict_provenance"]["wall_time_used_ms"], 1001);
        assert!(entry.get("source_bytes").is_none());
    }

    #[test]
    fn test_audit_logger_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("nested").join("audit.log");

        let logger = AuditLogger::new(Some(audit_path.clone())).unwrap();
        assert_eq!(logger.audit_path(), audit_path.as_path());

        logger.log_event(AuditEvent::new(
            AuditEventType::ExecutionStart,
            "first".to_string(),
        ));
        logger.log_event(
            AuditEvent::new(AuditEventType::ContextRejected, "second".to_string())
                .with_source_bytes(12),
        );

        let contents = std::fs::read_to_string(&audit_path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["details"], "first");
        assert_eq!(lines[1]["source_bytes"], 12);
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(AuditEventType::TimeoutExpired, "slow".to_string())
            .with_correlation(CorrelationIds::new("sb"));

        let json = serde_json::to_string(&event);
        assert!(json.is_ok());
    }
}
