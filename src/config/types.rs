/// Core types and structures for the scriptbox system
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source language of a snippet
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Language {
    #[serde(rename = "javascript")]
    #[default]
    JavaScript,
    #[serde(rename = "typescript")]
    TypeScript,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            other => Err(format!("Unknown language: {}", other)),
        }
    }
}

/// Per-run execution settings supplied by the caller
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Deadline in milliseconds; absent or 0 means the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Engine heap ceiling in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
    /// Accepted for compatibility; no network primitive is ever exposed
    #[serde(default)]
    pub allow_network: bool,
    /// Accepted for compatibility; no filesystem primitive is ever exposed
    #[serde(default)]
    pub allow_file_system: bool,
    /// Source language
    #[serde(default)]
    pub language: Language,
}

impl ExecutionContext {
    pub fn javascript() -> Self {
        Self::default()
    }

    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }
}

/// Kind of captured side effect
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Console,
    Html,
    Chart,
    Image,
    Table,
    Error,
}

/// Console severity of a `console` entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    Log,
    Warn,
    Error,
    Info,
}

impl OutputLevel {
    /// Name of the console method that produces this level
    pub fn method_name(self) -> &'static str {
        match self {
            OutputLevel::Log => "log",
            OutputLevel::Warn => "warn",
            OutputLevel::Error => "error",
            OutputLevel::Info => "info",
        }
    }
}

/// One captured side effect of a run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeOutput {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    /// Console arguments as a JSON array, table data, or an error message
    pub content: serde_json::Value,
    /// Epoch milliseconds at capture
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<OutputLevel>,
    /// 1-based line in the executed JavaScript, best effort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputIntegrity {
    #[serde(rename = "complete")]
    #[default]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
        }
    }
}

/// Verdict of a run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ExecutionStatus {
    /// Script (and any returned promise) completed normally
    #[serde(rename = "OK")]
    #[default]
    Ok,
    /// TypeScript source did not compile; no code ran
    #[serde(rename = "CE")]
    CompileError,
    /// Uncaught exception or rejected promise
    #[serde(rename = "RE")]
    RuntimeError,
    /// Deadline passed, or a returned promise could never settle
    #[serde(rename = "TLE")]
    TimeLimit,
    /// Engine heap limit reached
    #[serde(rename = "MLE")]
    MemoryLimit,
    /// Invalid context or engine setup failure
    #[serde(rename = "IE")]
    InternalError,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "OK",
            ExecutionStatus::CompileError => "CE",
            ExecutionStatus::RuntimeError => "RE",
            ExecutionStatus::TimeLimit => "TLE",
            ExecutionStatus::MemoryLimit => "MLE",
            ExecutionStatus::InternalError => "IE",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict actor - which layer decided the outcome
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerdictActor {
    /// Sandbox policy (context validation, deadline)
    #[serde(rename = "sandbox")]
    Sandbox,
    /// TypeScript front end
    #[serde(rename = "compiler")]
    Compiler,
    /// User code behaviour
    #[serde(rename = "runtime")]
    Runtime,
    /// JavaScript engine itself
    #[serde(rename = "engine")]
    Engine,
}

/// Verdict cause - specific reason for the verdict
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerdictCause {
    #[serde(rename = "normal_completion")]
    NormalCompletion,
    #[serde(rename = "ce_syntax")]
    CeSyntax,
    #[serde(rename = "re_uncaught_exception")]
    ReUncaughtException,
    #[serde(rename = "re_rejected_promise")]
    ReRejectedPromise,
    #[serde(rename = "tle_deadline")]
    TleDeadline,
    #[serde(rename = "tle_never_settles")]
    TleNeverSettles,
    #[serde(rename = "mle_engine_heap")]
    MleEngineHeap,
    #[serde(rename = "ie_invalid_context")]
    IeInvalidContext,
    #[serde(rename = "ie_engine_setup")]
    IeEngineSetup,
}

/// Limits in force for a run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LimitSnapshot {
    pub timeout_ms: u64,
    pub memory_limit_bytes: Option<u64>,
    pub max_stack_bytes: usize,
    pub max_output_entries: usize,
}

/// Why a run received its verdict
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerdictProvenance {
    /// Who made the decision
    pub verdict_actor: VerdictActor,
    /// Specific reason for verdict
    pub verdict_cause: VerdictCause,
    /// Wall time used
    pub wall_time_used_ms: u64,
    /// Limit snapshot at execution time
    pub limit_snapshot: LimitSnapshot,
}

/// Terminal outcome of one `execute_code` call
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Captured entries in emission order
    pub outputs: Vec<CodeOutput>,
    /// Wall-clock milliseconds
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Converted completion value of the script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output_integrity: OutputIntegrity,
}

/// A compiler-reported problem with an optional source position
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub message: String,
    /// 1-based line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column, counted in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Byte offset into the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "Line {}, Column {}: {}", line, column, self.message)
            }
            _ => f.write_str(&self.message),
        }
    }
}

/// Outcome of a compile or syntax check
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Newline-joined rendered diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn emitted(code: String) -> Self {
        Self {
            success: true,
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn clean() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        let rendered = diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            success: false,
            code: None,
            error: if rendered.is_empty() {
                None
            } else {
                Some(rendered)
            },
            diagnostics,
        }
    }
}

/// Custom error types for scriptbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rquickjs::Error> for SandboxError {
    fn from(err: rquickjs::Error) -> Self {
        SandboxError::Engine(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wire_names_are_camel_case() {
        let context = ExecutionContext::typescript()
            .with_timeout(250)
            .with_memory_limit(1 << 20);
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["timeout"], 250);
        assert_eq!(json["memoryLimit"], 1 << 20);
        assert_eq!(json["allowNetwork"], false);
        assert_eq!(json["allowFileSystem"], false);
        assert_eq!(json["language"], "typescript");
    }

    #[test]
    fn test_context_defaults_from_empty_json() {
        let context: ExecutionContext = serde_json::from_str("{}").unwrap();
        assert_eq!(context, ExecutionContext::default());
        assert_eq!(context.language, Language::JavaScript);
    }

    #[test]
    fn test_output_serializes_type_field() {
        let output = CodeOutput {
            output_type: OutputType::Console,
            content: serde_json::json!(["Hello"]),
            timestamp: 1,
            level: Some(OutputLevel::Warn),
            line_number: Some(3),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "console");
        assert_eq!(json["level"], "warn");
        assert_eq!(json["lineNumber"], 3);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ExecutionStatus::TimeLimit).unwrap();
        assert_eq!(json, "\"TLE\"");
        assert_eq!(ExecutionStatus::CompileError.to_string(), "CE");
    }

    #[test]
    fn test_diagnostic_rendering() {
        let positioned = Diagnostic {
            message: "Expected `,`".to_string(),
            line: Some(2),
            column: Some(7),
            offset: Some(12),
        };
        assert_eq!(positioned.to_string(), "Line 2, Column 7: Expected `,`");

        let bare = Diagnostic {
            message: "Unexpected end of input".to_string(),
            line: None,
            column: None,
            offset: None,
        };
        assert_eq!(bare.to_string(), "Unexpected end of input");
    }

    #[test]
    fn test_failed_compile_result_joins_diagnostics() {
        let result = CompileResult::failed(vec![
            Diagnostic {
                message: "a".to_string(),
                line: Some(1),
                column: Some(1),
                offset: Some(0),
            },
            Diagnostic {
                message: "b".to_string(),
                line: None,
                column: None,
                offset: None,
            },
        ]);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Line 1, Column 1: a\nb"));
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("ts".parse::<Language>().unwrap(), Language::TypeScript);
        assert_eq!("JavaScript".parse::<Language>().unwrap(), Language::JavaScript);
        assert!("python".parse::<Language>().is_err());
    }
}
