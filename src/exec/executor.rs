//! Script execution orchestration: validate, compile, run, classify

use crate::compiler::typescript::{self, CompileOptions};
use crate::config::settings::SandboxConfig;
use crate::config::types::{
    CodeOutput, ExecutionContext, ExecutionResult, ExecutionStatus, Language, SandboxError,
    VerdictProvenance,
};
use crate::config::validator::validate_context;
use crate::observability::audit::{events, CorrelationIds};
use crate::observability::metrics::get_metrics;
use crate::runtime::engine::{self, EngineLimits, EngineRun};
use crate::runtime::globals::{SandboxEnvironment, SharedOutputs};
use crate::utils::output::{OutputCollector, OutputLimits};
use crate::verdict::verdict::{RunEvidence, RunOutcome, VerdictClassifier};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

/// Sandbox that executes untrusted snippets against a restricted environment
///
/// Each `execute_code` call gets its own engine and output buffer; the
/// sandbox only retains the outputs of its most recent run.
pub struct CodeSandbox {
    config: SandboxConfig,
    sandbox_id: String,
    outputs: Vec<CodeOutput>,
    runs: u64,
}

impl CodeSandbox {
    /// Create a new sandbox
    pub fn new(config: SandboxConfig) -> Self {
        let sandbox_id = Uuid::new_v4().to_string();
        debug!("Created sandbox {}", sandbox_id);
        Self {
            config,
            sandbox_id,
            outputs: Vec::new(),
            runs: 0,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Outputs of the most recent run
    pub fn outputs(&self) -> &[CodeOutput] {
        &self.outputs
    }

    /// Number of runs served by this sandbox
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Clear the retained output buffer
    pub fn dispose(&mut self) {
        self.outputs.clear();
    }

    /// Execute a snippet and report its outcome
    ///
    /// Never fails: compile errors, exceptions, timeouts and engine problems
    /// are all reported through the returned result.
    pub fn execute_code(&mut self, source: &str, context: &ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        let correlation = CorrelationIds::new(&self.sandbox_id);
        let metrics = get_metrics();
        metrics.active_executions.inc();
        self.runs += 1;

        events::execution_start(
            correlation.clone(),
            &context.language.to_string(),
            source.len(),
        );

        let limits = self.config.limit_snapshot(context);
        let outputs: SharedOutputs = Rc::new(RefCell::new(OutputCollector::new(OutputLimits {
            max_entries: limits.max_output_entries,
        })));

        let run = self.run(source, context, &outputs, started, &correlation);

        let evidence = RunEvidence {
            outcome: run.outcome,
            wall_elapsed_ms: started.elapsed().as_millis() as u64,
            timers_fired: run.timers_fired,
            timers_discarded: run.timers_discarded,
            output_integrity: outputs.borrow().integrity(),
        };
        let (status, provenance) = VerdictClassifier::classify(&evidence, &limits);

        let error = evidence.outcome.error_message();
        if let Some(message) = &error {
            outputs.borrow_mut().add_error(message.clone());
        }

        let (collected, integrity, dropped) = {
            let mut collector = outputs.borrow_mut();
            let integrity = collector.integrity();
            let dropped = collector.dropped();
            (collector.take_outputs(), integrity, dropped)
        };

        let execution_time = started.elapsed();
        let result = ExecutionResult {
            success: status == ExecutionStatus::Ok,
            outputs: collected,
            execution_time: execution_time.as_millis() as u64,
            error,
            result: if status == ExecutionStatus::Ok {
                run.result
            } else {
                None
            },
            status,
            output_integrity: integrity,
        };

        metrics.record_execution(status);
        metrics.record_verdict_actor(provenance.verdict_actor);
        metrics.record_verdict_cause(provenance.verdict_cause);
        metrics.record_timers(evidence.timers_fired, evidence.timers_discarded);
        metrics.record_output_integrity(integrity);
        metrics.execution_duration.observe(execution_time);
        metrics.active_executions.dec();

        if dropped > 0 {
            events::output_limit_reached(
                correlation.clone(),
                dropped,
                limits.max_output_entries,
            );
        }
        self.audit_outcome(&correlation, &evidence.outcome, &provenance);
        events::execution_end(correlation, status.as_str(), provenance);

        info!(
            "Run {} finished: status={} time={}ms outputs={}",
            self.runs,
            status,
            result.execution_time,
            result.outputs.len()
        );

        self.outputs = result.outputs.clone();
        result
    }

    fn run(
        &self,
        source: &str,
        context: &ExecutionContext,
        outputs: &SharedOutputs,
        started: Instant,
        correlation: &CorrelationIds,
    ) -> EngineRun {
        match validate_context(context, &self.config) {
            Ok(validation) => {
                for warning in &validation.warnings {
                    debug!("Context warning: {}", warning);
                }
                for (flag, requested) in [
                    ("allowNetwork", context.allow_network),
                    ("allowFileSystem", context.allow_file_system),
                ] {
                    if requested {
                        events::advisory_flag_ignored(correlation.clone(), flag);
                    }
                }
            }
            Err(e) => {
                let reason = match e {
                    SandboxError::Config(message) => message,
                    other => other.to_string(),
                };
                events::context_rejected(correlation.clone(), &reason);
                return not_run(RunOutcome::InvalidContext(reason));
            }
        }

        let script = match context.language {
            Language::JavaScript => source.to_string(),
            Language::TypeScript => {
                let compile_started = Instant::now();
                let compiled = typescript::compile(source, &CompileOptions::default());
                get_metrics().record_compile(compiled.success, compile_started.elapsed());
                match compiled.code {
                    Some(code) if compiled.success => code,
                    _ => return not_run(RunOutcome::CompileFailed(compiled.error)),
                }
            }
        };

        let limits = EngineLimits {
            deadline: started + self.config.effective_timeout(context),
            memory_limit: self.config.effective_memory_limit(context),
            max_stack_bytes: self.config.limits.max_stack_bytes,
        };
        let environment = SandboxEnvironment::build(&self.config, context);

        match engine::run_script(&script, &environment, outputs, &limits) {
            Ok(run) => run,
            Err(e) => {
                warn!("Sandbox engine could not be prepared: {}", e);
                not_run(RunOutcome::EngineFailure(e.to_string()))
            }
        }
    }

    fn audit_outcome(
        &self,
        correlation: &CorrelationIds,
        outcome: &RunOutcome,
        provenance: &VerdictProvenance,
    ) {
        match outcome {
            RunOutcome::CompileFailed(_) => {
                let message = outcome.error_message().unwrap_or_default();
                events::compile_failure(correlation.clone(), &message);
            }
            RunOutcome::Threw(message) | RunOutcome::Rejected(message) => {
                events::runtime_exception(correlation.clone(), message);
            }
            RunOutcome::DeadlineExceeded | RunOutcome::NeverSettled => {
                events::timeout_expired(
                    correlation.clone(),
                    provenance.wall_time_used_ms,
                    provenance.limit_snapshot.timeout_ms,
                );
            }
            RunOutcome::OutOfMemory(_) => {
                events::memory_limit_exceeded(
                    correlation.clone(),
                    provenance.limit_snapshot.memory_limit_bytes,
                );
            }
            RunOutcome::EngineFailure(reason) => {
                events::engine_failure(correlation.clone(), reason);
            }
            RunOutcome::Completed | RunOutcome::InvalidContext(_) => {}
        }
    }
}

impl Default for CodeSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

fn not_run(outcome: RunOutcome) -> EngineRun {
    EngineRun {
        outcome,
        result: None,
        timers_fired: 0,
        timers_discarded: 0,
    }
}

/// Execute a snippet in a transient sandbox with the default configuration
pub fn execute_code(source: &str, context: &ExecutionContext) -> ExecutionResult {
    CodeSandbox::default().execute_code(source, context)
}
