//! Prometheus metrics for the filler.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means
//! duplicate metric names, which should crash at startup. These panics only
//! occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_gauge, CounterVec,
    Encoder, Gauge, HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Orders accepted by the scheduler.
/// Labels: kind, start (immediate/waiting)
pub static ORDERS_SCHEDULED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_orders_scheduled_total",
        "Orders accepted by the scheduler",
        &["kind", "start"]
    )
    .unwrap()
});

/// Orders ignored because a task already exists for them.
pub static ORDERS_DEDUPLICATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_orders_deduplicated_total",
        "Orders ignored because already in flight or settled",
        &["kind"]
    )
    .unwrap()
});

/// Final outcome of each execution.
/// Labels: kind, outcome (executed/gone/rejected/skipped/abandoned)
pub static FILL_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_outcomes_total",
        "Execution outcomes by order kind",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Failed execution attempts (before retry).
pub static FILL_ATTEMPT_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_attempt_errors_total",
        "Failed execution attempts by order kind",
        &["kind"]
    )
    .unwrap()
});

/// Scheduled wait before execution, in seconds.
pub static WAIT_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fill_wait_seconds",
        "Wait between scheduling and execution",
        &["kind"],
        vec![0.0, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 14400.0, 86400.0]
    )
    .unwrap()
});

/// Discovery passes.
/// Labels: pass (full/missed_only/deposits), source (indexer/ledger/failed)
pub static DISCOVERY_PASSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_discovery_passes_total",
        "Discovery passes by pass type and source",
        &["pass", "source"]
    )
    .unwrap()
});

/// Listener events by result (forwarded/gone/extract_failed/parse_failed).
pub static LISTENER_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fill_listener_events_total",
        "Watched instructions seen by the listener",
        &["instruction", "result"]
    )
    .unwrap()
});

/// Orders currently in flight.
pub static INFLIGHT_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("fill_inflight_orders", "Orders currently in flight").unwrap()
});

/// Operator wallet balance in SOL.
pub static OPERATOR_BALANCE_SOL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("fill_operator_balance_sol", "Operator wallet balance in SOL").unwrap()
});

/// Priority fee used for the last transaction, micro-lamports per CU.
pub static PRIORITY_FEE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "fill_priority_fee_micro_lamports",
        "Priority fee of the last built transaction"
    )
    .unwrap()
});

/// Operator alerts raised.
pub static ALERTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("fill_alerts_total", "Operator alerts raised", &["kind"]).unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn order_scheduled(kind: &str, start: &str) {
        ORDERS_SCHEDULED_TOTAL
            .with_label_values(&[kind, start])
            .inc();
    }

    pub fn order_deduplicated(kind: &str) {
        ORDERS_DEDUPLICATED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn fill_outcome(kind: &str, outcome: &str) {
        FILL_OUTCOMES_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn fill_attempt_error(kind: &str) {
        FILL_ATTEMPT_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn wait_scheduled(kind: &str, seconds: f64) {
        WAIT_SECONDS.with_label_values(&[kind]).observe(seconds);
    }

    pub fn discovery_pass(pass: &str, source: &str) {
        DISCOVERY_PASSES_TOTAL
            .with_label_values(&[pass, source])
            .inc();
    }

    pub fn listener_event(instruction: &str, result: &str) {
        LISTENER_EVENTS_TOTAL
            .with_label_values(&[instruction, result])
            .inc();
    }

    pub fn inflight_set(count: i64) {
        INFLIGHT_ORDERS.set(count);
    }

    pub fn operator_balance(sol: f64) {
        OPERATOR_BALANCE_SOL.set(sol);
    }

    pub fn priority_fee(micro_lamports: u64) {
        PRIORITY_FEE.set(micro_lamports as f64);
    }

    pub fn alert_raised(kind: &str) {
        ALERTS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
