// Metrics
//
// Process-wide counters, gauges and histograms for sandbox runs:
// - Execution outcomes (OK, CE, RE, TLE, MLE, IE)
// - Verdict actors and timeout causes
// - Timer activity and output truncation
// - Compile and execution latency
//
// Everything is lock-free atomics so sandboxes on different threads can
// record into the same registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{ExecutionStatus, OutputIntegrity, VerdictActor, VerdictCause};

/// Metric types for different measurement needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets tuned for in-process snippets: sub-millisecond to the 60s ceiling
    pub fn new_latency() -> Self {
        let bucket_bounds = vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0, 60.0,
        ];

        let buckets = bucket_bounds
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.00001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        for bucket in &self.buckets {
            bucket.count.store(0, Ordering::Relaxed);
        }
    }

    fn render(&self, name: &str, help: &str, output: &mut String) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            name,
            self.get_count()
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", name, self.get_count()));
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Execution outcome counters
    pub executions_total: Counter,
    pub executions_ok: Counter,
    pub executions_ce: Counter,
    pub executions_re: Counter,
    pub executions_tle: Counter,
    pub executions_mle: Counter,
    pub executions_ie: Counter,

    // Verdict actor counters
    pub verdict_actor_sandbox: Counter,
    pub verdict_actor_compiler: Counter,
    pub verdict_actor_runtime: Counter,
    pub verdict_actor_engine: Counter,

    // Timeout causes
    pub verdict_cause_tle_deadline: Counter,
    pub verdict_cause_tle_never_settles: Counter,

    // Timers and output
    pub timers_fired: Counter,
    pub timers_discarded: Counter,
    pub outputs_truncated: Counter,

    // Compiler
    pub compilations_total: Counter,
    pub compilations_failed: Counter,

    pub active_executions: Gauge,

    // Latency histograms
    pub execution_duration: Histogram,
    pub compile_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_total: Counter::new(),
            executions_ok: Counter::new(),
            executions_ce: Counter::new(),
            executions_re: Counter::new(),
            executions_tle: Counter::new(),
            executions_mle: Counter::new(),
            executions_ie: Counter::new(),

            verdict_actor_sandbox: Counter::new(),
            verdict_actor_compiler: Counter::new(),
            verdict_actor_runtime: Counter::new(),
            verdict_actor_engine: Counter::new(),

            verdict_cause_tle_deadline: Counter::new(),
            verdict_cause_tle_never_settles: Counter::new(),

            timers_fired: Counter::new(),
            timers_discarded: Counter::new(),
            outputs_truncated: Counter::new(),

            compilations_total: Counter::new(),
            compilations_failed: Counter::new(),

            active_executions: Gauge::new(),

            execution_duration: Histogram::new_latency(),
            compile_duration: Histogram::new_latency(),
        }
    }

    /// Record execution outcome
    pub fn record_execution(&self, status: ExecutionStatus) {
        self.executions_total.inc();

        match status {
            ExecutionStatus::Ok => self.executions_ok.inc(),
            ExecutionStatus::CompileError => self.executions_ce.inc(),
            ExecutionStatus::RuntimeError => self.executions_re.inc(),
            ExecutionStatus::TimeLimit => self.executions_tle.inc(),
            ExecutionStatus::MemoryLimit => self.executions_mle.inc(),
            ExecutionStatus::InternalError => self.executions_ie.inc(),
        }
    }

    /// Record verdict actor
    pub fn record_verdict_actor(&self, actor: VerdictActor) {
        match actor {
            VerdictActor::Sandbox => self.verdict_actor_sandbox.inc(),
            VerdictActor::Compiler => self.verdict_actor_compiler.inc(),
            VerdictActor::Runtime => self.verdict_actor_runtime.inc(),
            VerdictActor::Engine => self.verdict_actor_engine.inc(),
        }
    }

    /// Record verdict cause
    pub fn record_verdict_cause(&self, cause: VerdictCause) {
        match cause {
            VerdictCause::TleDeadline => self.verdict_cause_tle_deadline.inc(),
            VerdictCause::TleNeverSettles => self.verdict_cause_tle_never_settles.inc(),
            _ => {} // Other causes tracked via status counters
        }
    }

    pub fn record_timers(&self, fired: u64, discarded: usize) {
        self.timers_fired.add(fired);
        self.timers_discarded.add(discarded as u64);
    }

    pub fn record_output_integrity(&self, integrity: OutputIntegrity) {
        if integrity == OutputIntegrity::TruncatedByLimit {
            self.outputs_truncated.inc();
        }
    }

    pub fn record_compile(&self, success: bool, duration: Duration) {
        self.compilations_total.inc();
        if !success {
            self.compilations_failed.inc();
        }
        self.compile_duration.observe(duration);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP scriptbox_executions_total Total number of executions\n");
        output.push_str("# TYPE scriptbox_executions_total counter\n");
        output.push_str(&format!(
            "scriptbox_executions_total {}\n",
            self.executions_total.get()
        ));

        output.push_str("# HELP scriptbox_executions_by_status Executions by status\n");
        output.push_str("# TYPE scriptbox_executions_by_status counter\n");
        for (status, counter) in [
            (ExecutionStatus::Ok, &self.executions_ok),
            (ExecutionStatus::CompileError, &self.executions_ce),
            (ExecutionStatus::RuntimeError, &self.executions_re),
            (ExecutionStatus::TimeLimit, &self.executions_tle),
            (ExecutionStatus::MemoryLimit, &self.executions_mle),
            (ExecutionStatus::InternalError, &self.executions_ie),
        ] {
            output.push_str(&format!(
                "scriptbox_executions_by_status{{status=\"{}\"}} {}\n",
                status,
                counter.get()
            ));
        }

        output.push_str("# HELP scriptbox_verdicts_by_actor Verdicts by deciding layer\n");
        output.push_str("# TYPE scriptbox_verdicts_by_actor counter\n");
        for (actor, counter) in [
            ("sandbox", &self.verdict_actor_sandbox),
            ("compiler", &self.verdict_actor_compiler),
            ("runtime", &self.verdict_actor_runtime),
            ("engine", &self.verdict_actor_engine),
        ] {
            output.push_str(&format!(
                "scriptbox_verdicts_by_actor{{actor=\"{}\"}} {}\n",
                actor,
                counter.get()
            ));
        }

        output.push_str("# HELP scriptbox_timeouts_by_cause Timeouts by cause\n");
        output.push_str("# TYPE scriptbox_timeouts_by_cause counter\n");
        output.push_str(&format!(
            "scriptbox_timeouts_by_cause{{cause=\"deadline\"}} {}\n",
            self.verdict_cause_tle_deadline.get()
        ));
        output.push_str(&format!(
            "scriptbox_timeouts_by_cause{{cause=\"never_settles\"}} {}\n",
            self.verdict_cause_tle_never_settles.get()
        ));

        output.push_str("# HELP scriptbox_timers_total Host timers by fate\n");
        output.push_str("# TYPE scriptbox_timers_total counter\n");
        output.push_str(&format!(
            "scriptbox_timers_total{{fate=\"fired\"}} {}\n",
            self.timers_fired.get()
        ));
        output.push_str(&format!(
            "scriptbox_timers_total{{fate=\"discarded\"}} {}\n",
            self.timers_discarded.get()
        ));

        output.push_str("# HELP scriptbox_outputs_truncated_total Runs whose output hit the entry limit\n");
        output.push_str("# TYPE scriptbox_outputs_truncated_total counter\n");
        output.push_str(&format!(
            "scriptbox_outputs_truncated_total {}\n",
            self.outputs_truncated.get()
        ));

        output.push_str("# HELP scriptbox_compilations_total TypeScript compilations\n");
        output.push_str("# TYPE scriptbox_compilations_total counter\n");
        output.push_str(&format!(
            "scriptbox_compilations_total{{outcome=\"success\"}} {}\n",
            self.compilations_total
                .get()
                .saturating_sub(self.compilations_failed.get())
        ));
        output.push_str(&format!(
            "scriptbox_compilations_total{{outcome=\"failure\"}} {}\n",
            self.compilations_failed.get()
        ));

        output.push_str("# HELP scriptbox_active_executions Currently active executions\n");
        output.push_str("# TYPE scriptbox_active_executions gauge\n");
        output.push_str(&format!(
            "scriptbox_active_executions {}\n",
            self.active_executions.get()
        ));

        self.execution_duration.render(
            "scriptbox_execution_duration_seconds",
            "Wall time of execute_code calls",
            &mut output,
        );
        self.compile_duration.render(
            "scriptbox_compile_duration_seconds",
            "TypeScript compile time",
            &mut output,
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
