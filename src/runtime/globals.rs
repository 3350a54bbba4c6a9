//! Restricted global environment for user snippets.
//!
//! A [`SandboxEnvironment`] is the ordered mapping from global identifier to
//! binding. Installing it into a fresh realm first deletes every global the
//! mapping does not name, then defines the host bindings (`console` and the
//! timer functions). Built-ins reachable through prototypes, such as
//! `(() => {}).constructor`, stay reachable: the filter is on global names.

use crate::config::settings::SandboxConfig;
use crate::config::types::{ExecutionContext, OutputLevel, OutputType};
use crate::runtime::convert;
use crate::runtime::timers::{clamp_interval_delay, clamp_timeout_delay, TimerQueue};
use crate::utils::output::OutputCollector;
use log::debug;
use rquickjs::convert::Coerced;
use rquickjs::function::{Constructor, Opt, Rest};
use rquickjs::{Ctx, Function, Object, Persistent, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub type SharedOutputs = Rc<RefCell<OutputCollector>>;
pub type SharedTimers = Rc<RefCell<TimerQueue<Persistent<Function<'static>>>>>;

/// Engine built-ins left visible to user code
pub const INTRINSIC_GLOBALS: &[&str] = &[
    "Math",
    "JSON",
    "Date",
    "Array",
    "Object",
    "String",
    "Number",
    "Boolean",
    "RegExp",
    "Error",
    "Promise",
    "Map",
    "Set",
    "WeakMap",
    "WeakSet",
    "Symbol",
    "Proxy",
    "Reflect",
    "Intl",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "escape",
    "unescape",
    "encodeURI",
    "encodeURIComponent",
    "decodeURI",
    "decodeURIComponent",
];

/// Error subclasses thrown by the engine itself; kept so user code can
/// construct and test against them
pub const ERROR_TYPES: &[&str] = &[
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "EvalError",
    "URIError",
    "AggregateError",
];

/// Value properties of the global object
pub const LANGUAGE_VALUES: &[&str] = &["globalThis", "undefined", "NaN", "Infinity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBinding {
    Console,
    SetTimeout,
    SetInterval,
    ClearTimeout,
    ClearInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Engine built-in kept as is (absent if the engine lacks it)
    Intrinsic,
    /// Defined by the sandbox
    Host(HostBinding),
}

#[derive(Debug, Clone)]
pub struct SandboxEnvironment {
    bindings: Vec<(&'static str, Binding)>,
    timeout_cap: Duration,
    interval_cap: Duration,
}

impl SandboxEnvironment {
    pub fn build(config: &SandboxConfig, context: &ExecutionContext) -> Self {
        let mut bindings = vec![
            ("console", Binding::Host(HostBinding::Console)),
            ("setTimeout", Binding::Host(HostBinding::SetTimeout)),
            ("setInterval", Binding::Host(HostBinding::SetInterval)),
            ("clearTimeout", Binding::Host(HostBinding::ClearTimeout)),
            ("clearInterval", Binding::Host(HostBinding::ClearInterval)),
        ];
        bindings.extend(INTRINSIC_GLOBALS.iter().map(|name| (*name, Binding::Intrinsic)));
        bindings.extend(ERROR_TYPES.iter().map(|name| (*name, Binding::Intrinsic)));
        bindings.extend(LANGUAGE_VALUES.iter().map(|name| (*name, Binding::Intrinsic)));

        if context.allow_network || context.allow_file_system {
            debug!("Host I/O requested by context; the environment exposes none");
        }

        Self {
            bindings,
            timeout_cap: config.timeout_cap(),
            interval_cap: config.interval_cap(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.bindings.iter().map(|(name, _)| *name).collect()
    }

    pub fn binding(&self, name: &str) -> Option<Binding> {
        self.bindings
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, binding)| *binding)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.binding(name).is_some()
    }

    pub fn timeout_cap(&self) -> Duration {
        self.timeout_cap
    }

    pub fn interval_cap(&self) -> Duration {
        self.interval_cap
    }

    /// Purge unlisted globals from the realm and define the host bindings
    pub fn install<'js>(
        &self,
        ctx: &Ctx<'js>,
        outputs: &SharedOutputs,
        timers: &SharedTimers,
    ) -> rquickjs::Result<()> {
        purge_globals(ctx, &self.names())?;

        let globals = ctx.globals();
        for (name, binding) in &self.bindings {
            let Binding::Host(host) = binding else {
                continue;
            };
            match host {
                HostBinding::Console => globals.set(*name, console_object(ctx, outputs)?)?,
                HostBinding::SetTimeout => {
                    globals.set(*name, timer_function(ctx, timers, false, self.timeout_cap)?)?
                }
                HostBinding::SetInterval => {
                    globals.set(*name, timer_function(ctx, timers, true, self.interval_cap)?)?
                }
                HostBinding::ClearTimeout | HostBinding::ClearInterval => {
                    globals.set(*name, clear_function(ctx, timers)?)?
                }
            }
        }
        Ok(())
    }
}

const PURGE_GLOBALS: &str = r#"(function (allowed) {
    const keep = new Set(allowed);
    for (const name of Object.getOwnPropertyNames(globalThis)) {
        if (!keep.has(name)) {
            try { delete globalThis[name]; } catch (_) {}
        }
    }
})"#;

fn purge_globals<'js>(ctx: &Ctx<'js>, allowed: &[&str]) -> rquickjs::Result<()> {
    let purge: Function<'js> = ctx.eval(PURGE_GLOBALS)?;
    let allowed: Vec<String> = allowed.iter().map(|name| name.to_string()).collect();
    purge.call::<_, ()>((allowed,))
}

fn console_object<'js>(ctx: &Ctx<'js>, outputs: &SharedOutputs) -> rquickjs::Result<Object<'js>> {
    let console = Object::new(ctx.clone())?;

    for level in [
        OutputLevel::Log,
        OutputLevel::Warn,
        OutputLevel::Error,
        OutputLevel::Info,
    ] {
        let outputs = Rc::clone(outputs);
        let method = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let line_number = caller_line(&ctx);
            let content = serde_json::Value::Array(
                args.0.iter().map(|arg| convert::to_json(arg)).collect(),
            );
            // conversion may run user toJSON code, so borrow only after it
            outputs
                .borrow_mut()
                .add_output(OutputType::Console, content, Some(level), line_number);
        })?;
        console.set(level.method_name(), method)?;
    }

    let table_outputs = Rc::clone(outputs);
    let table = Function::new(ctx.clone(), move |ctx: Ctx<'js>, data: Opt<Value<'js>>| {
        let line_number = caller_line(&ctx);
        let content = data
            .0
            .as_ref()
            .map(|value| convert::to_json(value))
            .unwrap_or(serde_json::Value::Null);
        table_outputs
            .borrow_mut()
            .add_output(OutputType::Table, content, None, line_number);
    })?;
    console.set("table", table)?;

    let clear_outputs = Rc::clone(outputs);
    let clear = Function::new(ctx.clone(), move || {
        clear_outputs.borrow_mut().clear();
    })?;
    console.set("clear", clear)?;

    Ok(console)
}

fn timer_function<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    repeat: bool,
    cap: Duration,
) -> rquickjs::Result<Function<'js>> {
    let timers = Rc::clone(timers);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, callback: Function<'js>, delay: Opt<Coerced<f64>>| -> u32 {
            let raw = delay.0.map(|delay| delay.0).unwrap_or(0.0);
            let callback = Persistent::save(&ctx, callback);
            let now = Instant::now();
            let mut queue = timers.borrow_mut();
            if repeat {
                queue.schedule_interval(callback, clamp_interval_delay(raw, cap), now)
            } else {
                queue.schedule_timeout(callback, clamp_timeout_delay(raw, cap), now)
            }
        },
    )
}

fn clear_function<'js>(ctx: &Ctx<'js>, timers: &SharedTimers) -> rquickjs::Result<Function<'js>> {
    let timers = Rc::clone(timers);
    Function::new(ctx.clone(), move |id: Opt<Value<'js>>| {
        let id = id.0.and_then(|value| value.as_number());
        if let Some(id) = id.filter(|id| id.is_finite() && *id >= 1.0) {
            let cancelled = timers.borrow_mut().cancel(id as u32);
            if !cancelled {
                debug!("clear of unknown timer id {} ignored", id);
            }
        }
    })
}

/// Line of the innermost script frame calling into the host
fn caller_line(ctx: &Ctx<'_>) -> Option<u32> {
    let constructor: Constructor = ctx.globals().get("Error").ok()?;
    let error: Object = match constructor.construct(()) {
        Ok(error) => error,
        Err(_) => {
            let _ = ctx.catch();
            return None;
        }
    };
    let stack: String = error.get("stack").ok()?;
    parse_stack_line(&stack)
}

/// First line number found in a QuickJS backtrace, skipping native frames.
/// Frames look like `at f (eval_script:3)` or `at <eval> (eval_script:3:9)`.
pub fn parse_stack_line(stack: &str) -> Option<u32> {
    stack
        .lines()
        .map(str::trim)
        .filter(|frame| frame.starts_with("at "))
        .filter(|frame| !frame.contains("(native)"))
        .find_map(|frame| {
            let location = match (frame.rfind('('), frame.rfind(')')) {
                (Some(open), Some(close)) if open < close => &frame[open + 1..close],
                _ => frame.trim_start_matches("at "),
            };
            location.split(':').nth(1)?.trim().parse::<u32>().ok()
        })
}
