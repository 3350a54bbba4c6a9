/// Verdict classification and provenance
/// Deterministic mapping from what a run did to its status and the reason for it
use crate::config::types::*;

pub const TIMEOUT_MESSAGE: &str = "Execution timeout";
pub const COMPILE_FALLBACK_MESSAGE: &str = "TypeScript compilation failed";

/// How a run ended, as observed by the executor
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// Script finished; a returned promise fulfilled
    Completed,
    /// Uncaught exception from the script body
    Threw(String),
    /// Returned promise rejected
    Rejected(String),
    /// Interrupted at the deadline, or the deadline passed while waiting
    DeadlineExceeded,
    /// Returned promise can no longer settle: no jobs and no timers left
    NeverSettled,
    /// Engine allocator refused to grow past the memory limit
    OutOfMemory(String),
    /// TypeScript did not compile; the compiler's error text if any
    CompileFailed(Option<String>),
    /// Context rejected by validation
    InvalidContext(String),
    /// Engine could not be created or prepared
    EngineFailure(String),
}

impl RunOutcome {
    /// Error text reported for the run; `None` for a clean completion
    pub fn error_message(&self) -> Option<String> {
        match self {
            RunOutcome::Completed => None,
            RunOutcome::Threw(message)
            | RunOutcome::Rejected(message)
            | RunOutcome::OutOfMemory(message) => Some(message.clone()),
            RunOutcome::DeadlineExceeded | RunOutcome::NeverSettled => {
                Some(TIMEOUT_MESSAGE.to_string())
            }
            RunOutcome::CompileFailed(message) => Some(
                message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| COMPILE_FALLBACK_MESSAGE.to_string()),
            ),
            RunOutcome::InvalidContext(message) => {
                Some(format!("Invalid execution context: {}", message))
            }
            RunOutcome::EngineFailure(message) => {
                Some(format!("Sandbox engine failure: {}", message))
            }
        }
    }
}

/// Immutable evidence collected during a run
#[derive(Clone, Debug, PartialEq)]
pub struct RunEvidence {
    pub outcome: RunOutcome,
    pub wall_elapsed_ms: u64,
    pub timers_fired: u64,
    pub timers_discarded: usize,
    pub output_integrity: OutputIntegrity,
}

/// Verdict classifier - pure function over run evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// Classify execution outcome based on evidence
    /// This is a pure, deterministic function
    pub fn classify(
        evidence: &RunEvidence,
        limits: &LimitSnapshot,
    ) -> (ExecutionStatus, VerdictProvenance) {
        match &evidence.outcome {
            RunOutcome::Completed => Self::verdict(
                ExecutionStatus::Ok,
                VerdictActor::Runtime,
                VerdictCause::NormalCompletion,
                evidence,
                limits,
            ),
            RunOutcome::Threw(_) => Self::classify_runtime_error(
                VerdictCause::ReUncaughtException,
                evidence,
                limits,
            ),
            RunOutcome::Rejected(_) => {
                Self::classify_runtime_error(VerdictCause::ReRejectedPromise, evidence, limits)
            }
            RunOutcome::DeadlineExceeded | RunOutcome::NeverSettled => {
                Self::classify_time_limit(evidence, limits)
            }
            RunOutcome::OutOfMemory(_) => Self::verdict(
                ExecutionStatus::MemoryLimit,
                VerdictActor::Engine,
                VerdictCause::MleEngineHeap,
                evidence,
                limits,
            ),
            RunOutcome::CompileFailed(_) => Self::verdict(
                ExecutionStatus::CompileError,
                VerdictActor::Compiler,
                VerdictCause::CeSyntax,
                evidence,
                limits,
            ),
            RunOutcome::InvalidContext(_) => Self::verdict(
                ExecutionStatus::InternalError,
                VerdictActor::Sandbox,
                VerdictCause::IeInvalidContext,
                evidence,
                limits,
            ),
            RunOutcome::EngineFailure(_) => Self::verdict(
                ExecutionStatus::InternalError,
                VerdictActor::Engine,
                VerdictCause::IeEngineSetup,
                evidence,
                limits,
            ),
        }
    }

    fn classify_runtime_error(
        cause: VerdictCause,
        evidence: &RunEvidence,
        limits: &LimitSnapshot,
    ) -> (ExecutionStatus, VerdictProvenance) {
        Self::verdict(
            ExecutionStatus::RuntimeError,
            VerdictActor::Runtime,
            cause,
            evidence,
            limits,
        )
    }

    /// The sandbox enforces the deadline; a promise that can never settle is
    /// reported the same way without waiting the deadline out
    fn classify_time_limit(
        evidence: &RunEvidence,
        limits: &LimitSnapshot,
    ) -> (ExecutionStatus, VerdictProvenance) {
        let cause = if evidence.outcome == RunOutcome::NeverSettled {
            VerdictCause::TleNeverSettles
        } else {
            VerdictCause::TleDeadline
        };
        Self::verdict(
            ExecutionStatus::TimeLimit,
            VerdictActor::Sandbox,
            cause,
            evidence,
            limits,
        )
    }

    fn verdict(
        status: ExecutionStatus,
        actor: VerdictActor,
        cause: VerdictCause,
        evidence: &RunEvidence,
        limits: &LimitSnapshot,
    ) -> (ExecutionStatus, VerdictProvenance) {
        let provenance = VerdictProvenance {
            verdict_actor: actor,
            verdict_cause: cause,
            wall_time_used_ms: evidence.wall_elapsed_ms,
            limit_snapshot: limits.clone(),
        };
        (status, provenance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_limits() -> LimitSnapshot {
        LimitSnapshot {
            timeout_ms: 5000,
            memory_limit_bytes: Some(256 * 1024 * 1024),
            max_stack_bytes: 1024 * 1024,
            max_output_entries: 10_000,
        }
    }

    fn evidence(outcome: RunOutcome) -> RunEvidence {
        RunEvidence {
            outcome,
            wall_elapsed_ms: 12,
            timers_fired: 0,
            timers_discarded: 0,
            output_integrity: OutputIntegrity::Complete,
        }
    }

    #[test]
    fn test_classify_ok() {
        let limits = create_test_limits();
        let (status, provenance) =
            VerdictClassifier::classify(&evidence(RunOutcome::Completed), &limits);

        assert_eq!(status, ExecutionStatus::Ok);
        assert_eq!(provenance.verdict_actor, VerdictActor::Runtime);
        assert_eq!(provenance.verdict_cause, VerdictCause::NormalCompletion);
        assert_eq!(provenance.wall_time_used_ms, 12);
        assert_eq!(provenance.limit_snapshot, limits);
    }

    #[test]
    fn test_classify_runtime_errors() {
        let limits = create_test_limits();
        let (status, provenance) = VerdictClassifier::classify(
            &evidence(RunOutcome::Threw("Test error".to_string())),
            &limits,
        );
        assert_eq!(status, ExecutionStatus::RuntimeError);
        assert_eq!(provenance.verdict_cause, VerdictCause::ReUncaughtException);

        let (status, provenance) = VerdictClassifier::classify(
            &evidence(RunOutcome::Rejected("nope".to_string())),
            &limits,
        );
        assert_eq!(status, ExecutionStatus::RuntimeError);
        assert_eq!(provenance.verdict_cause, VerdictCause::ReRejectedPromise);
    }

    #[test]
    fn test_classify_timeouts() {
        let limits = create_test_limits();
        let (status, provenance) =
            VerdictClassifier::classify(&evidence(RunOutcome::DeadlineExceeded), &limits);
        assert_eq!(status, ExecutionStatus::TimeLimit);
        assert_eq!(provenance.verdict_actor, VerdictActor::Sandbox);
        assert_eq!(provenance.verdict_cause, VerdictCause::TleDeadline);

        let (status, provenance) =
            VerdictClassifier::classify(&evidence(RunOutcome::NeverSettled), &limits);
        assert_eq!(status, ExecutionStatus::TimeLimit);
        assert_eq!(provenance.verdict_cause, VerdictCause::TleNeverSettles);
    }

    #[test]
    fn test_classify_memory_and_internal() {
        let limits = create_test_limits();
        let (status, provenance) = VerdictClassifier::classify(
            &evidence(RunOutcome::OutOfMemory("out of memory".to_string())),
            &limits,
        );
        assert_eq!(status, ExecutionStatus::MemoryLimit);
        assert_eq!(provenance.verdict_actor, VerdictActor::Engine);

        let (status, provenance) = VerdictClassifier::classify(
            &evidence(RunOutcome::InvalidContext("timeout too large".to_string())),
            &limits,
        );
        assert_eq!(status, ExecutionStatus::InternalError);
        assert_eq!(provenance.verdict_cause, VerdictCause::IeInvalidContext);
    }

    #[test]
    fn test_classify_compile_failure() {
        let (status, provenance) = VerdictClassifier::classify(
            &evidence(RunOutcome::CompileFailed(None)),
            &create_test_limits(),
        );
        assert_eq!(status, ExecutionStatus::CompileError);
        assert_eq!(provenance.verdict_actor, VerdictActor::Compiler);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(RunOutcome::Completed.error_message(), None);
        assert_eq!(
            RunOutcome::DeadlineExceeded.error_message().as_deref(),
            Some(TIMEOUT_MESSAGE)
        );
        assert_eq!(
            RunOutcome::NeverSettled.error_message().as_deref(),
            Some(TIMEOUT_MESSAGE)
        );
        assert_eq!(
            RunOutcome::CompileFailed(None).error_message().as_deref(),
            Some(COMPILE_FALLBACK_MESSAGE)
        );
        assert_eq!(
            RunOutcome::CompileFailed(Some("Line 1, Column 5: Expected `,`".to_string()))
                .error_message()
                .as_deref(),
            Some("Line 1, Column 5: Expected `,`")
        );
        assert!(RunOutcome::EngineFailure("x".to_string())
            .error_message()
            .unwrap()
            .contains("engine failure"));
    }
}
