//! Single-run script engine.
//!
//! Every call builds a fresh QuickJS runtime and realm, installs the sandbox
//! environment, evaluates the source as global code (falling back to a
//! function body for a top-level `return`) and then drives a small
//! event loop until the completion value settles or the deadline passes.
//! An interrupt handler aborts running script once the deadline is reached,
//! so tight loops are preempted rather than waited out.

use crate::config::types::Result;
use crate::runtime::convert;
use crate::runtime::globals::{SandboxEnvironment, SharedOutputs, SharedTimers};
use crate::runtime::timers::TimerQueue;
use crate::verdict::verdict::RunOutcome;
use log::{debug, trace};
use rquickjs::context::EvalOptions;
use rquickjs::function::{Opt, This};
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Object, Runtime, Value};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Limits applied to one engine run
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Instant after which script is interrupted
    pub deadline: Instant,
    /// Engine heap ceiling in bytes
    pub memory_limit: Option<u64>,
    pub max_stack_bytes: usize,
}

/// What the engine observed
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub outcome: RunOutcome,
    /// Converted completion value (or fulfilment value of a returned promise)
    pub result: Option<JsonValue>,
    pub timers_fired: u64,
    /// Timers still pending when the run ended
    pub timers_discarded: usize,
}

enum Settlement {
    Fulfilled(Option<JsonValue>),
    Rejected(String),
}

type SettlementSlot = Rc<RefCell<Option<Settlement>>>;

/// Evaluate `source` in a fresh realm and wait for it to settle.
///
/// Script failures are reported through [`EngineRun::outcome`]; an `Err` means
/// the engine itself could not be prepared.
pub fn run_script(
    source: &str,
    environment: &SandboxEnvironment,
    outputs: &SharedOutputs,
    limits: &EngineLimits,
) -> Result<EngineRun> {
    let runtime = Runtime::new()?;
    if let Some(limit) = limits.memory_limit {
        runtime.set_memory_limit(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    runtime.set_max_stack_size(limits.max_stack_bytes);

    let tripped = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&tripped);
    let deadline = limits.deadline;
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if Instant::now() >= deadline {
            handler_flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    })));

    let context = Context::full(&runtime)?;
    let timers: SharedTimers = Rc::new(RefCell::new(TimerQueue::new()));

    context.with(|ctx| {
        let driven = drive(&ctx, source, environment, outputs, &timers, limits, &tripped);
        // pending callbacks must be released before the runtime is freed
        let timers_discarded = timers.borrow_mut().clear();
        if timers_discarded > 0 {
            debug!("Discarded {} pending timer(s) at settlement", timers_discarded);
        }
        driven.map(|(outcome, result, timers_fired)| EngineRun {
            outcome,
            result,
            timers_fired,
            timers_discarded,
        })
    })
}

fn drive<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    environment: &SandboxEnvironment,
    outputs: &SharedOutputs,
    timers: &SharedTimers,
    limits: &EngineLimits,
    tripped: &AtomicBool,
) -> Result<(RunOutcome, Option<JsonValue>, u64)> {
    environment
        .install(ctx, outputs, timers)
        .map_err(|e| engine_error(ctx, e))?;
    // captured before user code can replace the global
    let promise_ctor: Object<'js> = ctx
        .globals()
        .get("Promise")
        .map_err(|e| engine_error(ctx, e))?;

    let slot: SettlementSlot = Rc::new(RefCell::new(None));
    let mut evaluated = evaluate(ctx, source.to_string());
    let bare_return = matches!(
        &evaluated,
        Err(CaughtError::Exception(exception))
            if exception
                .message()
                .is_some_and(|message| message.contains(RETURN_OUTSIDE_FUNCTION))
    );
    if bare_return {
        // top-level `return`: rerun as a function body, same first line
        trace!("Re-evaluating source as a function body");
        evaluated = evaluate(ctx, format!("(function () {{ {}\n}})()", source));
    }
    match evaluated {
        Err(caught) => {
            return Ok((failure(caught_message(caught), tripped), None, 0));
        }
        Ok(value) => {
            if is_thenable(&value) {
                if let Err(caught) = attach_settlement(ctx, &promise_ctor, value, &slot).catch(ctx)
                {
                    return Ok((failure(caught_message(caught), tripped), None, 0));
                }
            } else {
                *slot.borrow_mut() = Some(Settlement::Fulfilled(convert::to_result(&value)));
            }
        }
    }

    let mut timers_fired = 0u64;
    loop {
        drain_jobs(ctx, tripped);
        if tripped.load(Ordering::SeqCst) {
            return Ok((RunOutcome::DeadlineExceeded, None, timers_fired));
        }

        let settled = slot.borrow_mut().take();
        if let Some(settlement) = settled {
            let finished = match settlement {
                Settlement::Fulfilled(result) => (RunOutcome::Completed, result),
                Settlement::Rejected(message) => (rejection(message), None),
            };
            return Ok((finished.0, finished.1, timers_fired));
        }

        let now = Instant::now();
        if now >= limits.deadline {
            return Ok((RunOutcome::DeadlineExceeded, None, timers_fired));
        }

        let next_due = timers.borrow().next_due();
        let Some(due) = next_due else {
            debug!("Returned promise can no longer settle: no jobs or timers left");
            return Ok((RunOutcome::NeverSettled, None, timers_fired));
        };
        if due > now {
            std::thread::sleep(due.min(limits.deadline) - now);
            continue;
        }

        let popped = timers.borrow_mut().pop_due(now);
        let Some(timer) = popped else {
            continue;
        };
        timers_fired += 1;
        trace!("Firing timer {}", timer.id);

        let call = timer
            .payload
            .clone()
            .restore(ctx)
            .and_then(|callback: Function<'js>| callback.call::<_, Value<'js>>(()))
            .catch(ctx);
        if let Err(caught) = call {
            if tripped.load(Ordering::SeqCst) {
                return Ok((RunOutcome::DeadlineExceeded, None, timers_fired));
            }
            let message = caught_message(caught);
            if is_out_of_memory(&message) {
                return Ok((RunOutcome::OutOfMemory(message), None, timers_fired));
            }
            // a throwing callback is reported and the run goes on
            outputs.borrow_mut().add_error(message);
        }
        timers.borrow_mut().complete(timer, Instant::now());
    }
}

/// Engine wording for a `return` statement in global code
const RETURN_OUTSIDE_FUNCTION: &str = "return not in a function";

/// Evaluate sloppy-mode global code, yielding its completion value
fn evaluate<'js>(
    ctx: &Ctx<'js>,
    source: String,
) -> std::result::Result<Value<'js>, CaughtError<'js>> {
    let mut options = EvalOptions::default();
    options.strict = false;
    ctx.eval_with_options::<Value<'js>, _>(source, options).catch(ctx)
}

/// Run queued promise reactions until none are left or the deadline trips
fn drain_jobs(ctx: &Ctx<'_>, tripped: &AtomicBool) {
    while ctx.execute_pending_job() {
        if tripped.load(Ordering::SeqCst) {
            break;
        }
    }
}

fn is_thenable(value: &Value<'_>) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    match object.get::<_, Value>("then") {
        Ok(then) => then.is_function(),
        Err(_) => {
            // a throwing `then` getter; the value is treated as plain
            let _ = value.ctx().catch();
            false
        }
    }
}

/// Resolve `value` through the realm's `Promise.resolve` and record how it settles
fn attach_settlement<'js>(
    ctx: &Ctx<'js>,
    promise_ctor: &Object<'js>,
    value: Value<'js>,
    slot: &SettlementSlot,
) -> rquickjs::Result<()> {
    let resolve: Function<'js> = promise_ctor.get("resolve")?;
    let promise: Object<'js> = resolve.call((This(promise_ctor.clone()), value))?;
    let then: Function<'js> = promise.get("then")?;

    let fulfilled_slot = Rc::clone(slot);
    let on_fulfilled = Function::new(ctx.clone(), move |value: Opt<Value<'js>>| {
        let result = value.0.as_ref().and_then(|value| convert::to_result(value));
        *fulfilled_slot.borrow_mut() = Some(Settlement::Fulfilled(result));
    })?;

    let rejected_slot = Rc::clone(slot);
    let on_rejected = Function::new(ctx.clone(), move |reason: Opt<Value<'js>>| {
        let message = reason
            .0
            .as_ref()
            .map(|reason| convert::error_message(reason))
            .unwrap_or_else(|| "undefined".to_string());
        *rejected_slot.borrow_mut() = Some(Settlement::Rejected(message));
    })?;

    then.call::<_, Value<'js>>((This(promise), on_fulfilled, on_rejected))?;
    Ok(())
}

fn caught_message(caught: CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(exception) => convert::exception_message(&exception),
        CaughtError::Value(value) => convert::error_message(&value),
        CaughtError::Error(error) => error.to_string(),
    }
}

fn failure(message: String, tripped: &AtomicBool) -> RunOutcome {
    if tripped.load(Ordering::SeqCst) {
        RunOutcome::DeadlineExceeded
    } else if is_out_of_memory(&message) {
        RunOutcome::OutOfMemory(message)
    } else {
        RunOutcome::Threw(message)
    }
}

fn rejection(message: String) -> RunOutcome {
    if is_out_of_memory(&message) {
        RunOutcome::OutOfMemory(message)
    } else {
        RunOutcome::Rejected(message)
    }
}

fn is_out_of_memory(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("out of memory") || lowered.contains("allocation failed")
}

fn engine_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> crate::config::types::SandboxError {
    let message = match Err::<(), _>(error).catch(ctx) {
        Err(caught) => caught_message(caught),
        Ok(()) => "unknown engine error".to_string(),
    };
    crate::config::types::SandboxError::Engine(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SandboxConfig;
    use crate::config::types::{ExecutionContext, OutputType};
    use crate::utils::output::OutputCollector;
    use serde_json::json;
    use std::time::Duration;

    fn run(source: &str, timeout: Duration) -> (EngineRun, OutputCollector) {
        let config = SandboxConfig::default();
        let environment = SandboxEnvironment::build(&config, &ExecutionContext::default());
        let outputs: SharedOutputs = Rc::new(RefCell::new(OutputCollector::default()));
        let limits = EngineLimits {
            deadline: Instant::now() + timeout,
            memory_limit: Some(64 * 1024 * 1024),
            max_stack_bytes: 512 * 1024,
        };
        let engine_run = run_script(source, &environment, &outputs, &limits).unwrap();
        let collector = outputs.replace(OutputCollector::default());
        (engine_run, collector)
    }

    #[test]
    fn test_completion_value_is_result() {
        let (engine_run, _) = run("const x = 20; x + 22;", Duration::from_secs(1));
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        assert_eq!(engine_run.result, Some(json!(42)));
    }

    #[test]
    fn test_undefined_completion_has_no_result() {
        let (engine_run, _) = run("let y = 1;", Duration::from_secs(1));
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        assert_eq!(engine_run.result, None);
    }

    #[test]
    fn test_sloppy_mode_assignment() {
        let (engine_run, _) = run("implicitGlobal = 5; implicitGlobal", Duration::from_secs(1));
        assert_eq!(engine_run.result, Some(json!(5)));
    }

    #[test]
    fn test_returned_promise_waits_for_timer() {
        let source = r#"
            new Promise((resolve) => {
                setTimeout(() => { console.log("tick"); resolve("done"); }, 20);
            });
        "#;
        let (engine_run, outputs) = run(source, Duration::from_secs(2));
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        assert_eq!(engine_run.result, Some(json!("done")));
        assert_eq!(engine_run.timers_fired, 1);
        assert_eq!(outputs.snapshot()[0].content, json!(["tick"]));
    }

    #[test]
    fn test_top_level_return_is_result() {
        let (engine_run, outputs) = run(
            "console.log('a');\nif (true) { return 5; }\n99;",
            Duration::from_secs(1),
        );
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        assert_eq!(engine_run.result, Some(json!(5)));
        assert_eq!(outputs.snapshot().len(), 1);
    }

    #[test]
    fn test_top_level_return_of_promise_settles() {
        let (engine_run, _) = run(
            "return new Promise((resolve) => setTimeout(() => resolve('later'), 5));",
            Duration::from_secs(1),
        );
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        assert_eq!(engine_run.result, Some(json!("later")));
    }

    #[test]
    fn test_other_syntax_errors_are_not_retried() {
        let (engine_run, _) = run("const = 1;", Duration::from_secs(1));
        assert!(matches!(engine_run.outcome, RunOutcome::Threw(_)));
    }

    #[test]
    fn test_rejected_promise() {
        let (engine_run, _) = run(
            "Promise.reject(new Error('nope'))",
            Duration::from_secs(1),
        );
        assert_eq!(engine_run.outcome, RunOutcome::Rejected("nope".to_string()));
    }

    #[test]
    fn test_tight_loop_is_interrupted() {
        let started = Instant::now();
        let (engine_run, _) = run("while (true) {}", Duration::from_millis(100));
        assert_eq!(engine_run.outcome, RunOutcome::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_unsettleable_promise_reports_immediately() {
        let started = Instant::now();
        let (engine_run, _) = run("new Promise(() => {})", Duration::from_secs(5));
        assert_eq!(engine_run.outcome, RunOutcome::NeverSettled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_throwing_timer_callback_is_recorded() {
        let source = r#"
            new Promise((resolve) => {
                setTimeout(() => { throw new Error("in timer"); }, 0);
                setTimeout(() => resolve(1), 5);
            });
        "#;
        let (engine_run, outputs) = run(source, Duration::from_secs(2));
        assert_eq!(engine_run.outcome, RunOutcome::Completed);
        let errors: Vec<_> = outputs
            .snapshot()
            .into_iter()
            .filter(|o| o.output_type == OutputType::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, json!("in timer"));
    }

    #[test]
    fn test_pending_timers_discarded_at_settlement() {
        let (engine_run, outputs) = run(
            "setTimeout(() => console.log('late'), 10000); 'now'",
            Duration::from_secs(1),
        );
        assert_eq!(engine_run.result, Some(json!("now")));
        assert_eq!(engine_run.timers_discarded, 1);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_unlisted_globals_removed() {
        let (engine_run, _) = run(
            "[typeof eval, typeof Function, typeof Math, typeof console]",
            Duration::from_secs(1),
        );
        assert_eq!(
            engine_run.result,
            Some(json!(["undefined", "undefined", "object", "object"]))
        );
    }

    #[test]
    fn test_memory_limit_reported() {
        let config = SandboxConfig::default();
        let environment = SandboxEnvironment::build(&config, &ExecutionContext::default());
        let outputs: SharedOutputs = Rc::new(RefCell::new(OutputCollector::default()));
        let limits = EngineLimits {
            deadline: Instant::now() + Duration::from_secs(5),
            memory_limit: Some(8 * 1024 * 1024),
            max_stack_bytes: 512 * 1024,
        };
        let source = "const chunks = []; while (true) { chunks.push(new Array(100000).fill(1)); }";
        let engine_run = run_script(source, &environment, &outputs, &limits).unwrap();
        assert!(
            matches!(engine_run.outcome, RunOutcome::OutOfMemory(_)),
            "{:?}",
            engine_run.outcome
        );
    }
}
