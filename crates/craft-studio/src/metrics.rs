//! Prometheus metrics for the gateway and the session store.
//!
//! Recording functions are no-ops until `init_metrics` has run, so library
//! users that never install metrics pay nothing.
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

struct StudioMetrics {
    dispatches: IntCounterVec,
    cache_lookups: IntCounterVec,
    store_ops: IntCounterVec,
    pacer_wait: Histogram,
}

static METRICS: OnceLock<StudioMetrics> = OnceLock::new();

pub fn init_metrics() -> prometheus::Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = StudioMetrics {
        dispatches: IntCounterVec::new(
            prometheus::opts!("model_dispatches_total", "Model dispatches by outcome"),
            &["outcome"],
        )?,
        cache_lookups: IntCounterVec::new(
            prometheus::opts!("response_cache_lookups_total", "Response cache lookups"),
            &["result"],
        )?,
        store_ops: IntCounterVec::new(
            prometheus::opts!("session_store_operations_total", "Session store operations"),
            &["operation", "status"],
        )?,
        pacer_wait: Histogram::with_opts(HistogramOpts::new(
            "pacer_wait_seconds",
            "Time spent waiting for a dispatch slot",
        ))?,
    };

    register(Box::new(metrics.dispatches.clone()))?;
    register(Box::new(metrics.cache_lookups.clone()))?;
    register(Box::new(metrics.store_ops.clone()))?;
    register(Box::new(metrics.pacer_wait.clone()))?;

    let _ = METRICS.set(metrics);
    Ok(())
}

// a concurrent init may have registered the same collectors first
fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn inc_dispatch(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.dispatches.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_cache_lookup(result: &str) {
    if let Some(m) = METRICS.get() {
        m.cache_lookups.with_label_values(&[result]).inc();
    }
}

pub fn inc_store_op(operation: &str, status: &str) {
    if let Some(m) = METRICS.get() {
        m.store_ops.with_label_values(&[operation, status]).inc();
    }
}

pub fn observe_pacer_wait(seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.pacer_wait.observe(seconds);
    }
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
