//! Session metrics emission.
//!
//! Metrics go out as structured tracing events under the `metrics` target
//! unless another sink is installed (tests install one to capture them).

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(u64),
    Histogram(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricLabel {
    pub key: &'static str,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: &'static str,
    pub value: MetricValue,
    pub labels: Vec<MetricLabel>,
}

pub trait MetricSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&self, event: MetricEvent) {
        let (kind, value) = match event.value {
            MetricValue::Counter(value) => ("counter", value),
            MetricValue::Gauge(value) => ("gauge", value),
            MetricValue::Histogram(value) => ("histogram", value),
        };
        tracing::info!(
            target: "metrics",
            metric = event.name,
            kind,
            value,
            labels = ?event.labels
        );
    }
}

static METRIC_SINK: OnceLock<RwLock<Arc<dyn MetricSink>>> = OnceLock::new();

fn sink_lock() -> &'static RwLock<Arc<dyn MetricSink>> {
    METRIC_SINK.get_or_init(|| RwLock::new(Arc::new(TracingSink)))
}

fn sink() -> Arc<dyn MetricSink> {
    sink_lock()
        .read()
        .expect("metrics sink lock poisoned")
        .clone()
}

pub fn set_sink(sink: Arc<dyn MetricSink>) {
    *sink_lock().write().expect("metrics sink lock poisoned") = sink;
}

fn emit(name: &'static str, value: MetricValue, labels: Vec<MetricLabel>) {
    sink().record(MetricEvent { name, value, labels });
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn commands_sent(count: usize) {
    emit("commands_sent", MetricValue::Counter(count as u64), Vec::new());
}

pub fn commands_replayed(count: usize) {
    emit(
        "commands_replayed",
        MetricValue::Counter(count as u64),
        Vec::new(),
    );
}

pub fn outbox_depth(commands: usize, bytes: usize) {
    emit(
        "outbox_commands",
        MetricValue::Gauge(commands as u64),
        Vec::new(),
    );
    emit("outbox_bytes", MetricValue::Gauge(bytes as u64), Vec::new());
}

/// Time a producer spent blocked on peer credit.
pub fn credit_wait(duration: Duration) {
    emit(
        "credit_wait_duration",
        MetricValue::Histogram(duration_ms(duration)),
        Vec::new(),
    );
}

pub fn results_dropped(count: u64) {
    emit("results_dropped", MetricValue::Counter(count), Vec::new());
}

pub fn session_state(session: &str, state: &'static str) {
    emit(
        "session_state",
        MetricValue::Counter(1),
        vec![
            MetricLabel {
                key: "session",
                value: session.to_string(),
            },
            MetricLabel {
                key: "state",
                value: state.to_string(),
            },
        ],
    );
}
