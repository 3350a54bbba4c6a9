//! scriptbox: an in-process sandbox for JavaScript and TypeScript snippets
//! Runs untrusted notebook code against a restricted global environment with a deadline,
//! capturing console output, errors and the completion value for display.
//!
//! # Architecture
//!
//! ## Compiler ([`compiler`])
//! - [`compiler::typescript`]: Syntax-level TypeScript transpilation, checking and formatting
//!
//! ## Runtime ([`runtime`])
//! - [`runtime::globals`]: Restricted global environment and host bindings
//! - [`runtime::timers`]: Host timer queue with delay clamping
//! - [`runtime::convert`]: Engine value to JSON conversion
//! - [`runtime::engine`]: Single-run engine with interrupt-based deadline
//!
//! ## Execution Control ([`exec`])
//! - [`exec::executor`]: `CodeSandbox` orchestration of validate, compile, run and classify
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Evidence-backed status classification
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: `scriptbox.json` loading and defaults
//! - [`config::validator`]: Config and context validation
//! - [`config::types`]: Shared type definitions and closed enums
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded output collection
//! - [`utils::html`]: Best-effort HTML sanitizing
//!
//! # Design Principles
//!
//! 1. **One engine per run** - No state survives between executions
//! 2. **Allow-list globals** - Anything not named is removed before user code runs
//! 3. **Deadlines preempt** - Running script is interrupted, not waited out
//! 4. **Failures are results** - Nothing crosses `execute_code` as an error

// TypeScript front end
pub mod compiler;

// Engine and environment
pub mod runtime;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the scriptbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::settings::SandboxConfig;
pub use config::types::*;
pub use compiler::typescript::{check_typescript_syntax, compile_typescript, format_typescript};
pub use exec::executor::{execute_code, CodeSandbox};
pub use utils::html::render_safe_html;
