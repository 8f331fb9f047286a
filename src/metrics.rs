// Prometheus metrics for the admission gateway
//
// Exposed on the /metrics HTTP endpoint:
// - Admission decisions by check and outcome (counter)
// - Admission check latency (histogram)
// - Recorded cost and estimate drift (counters)
// - Counter store errors (counter)
// - Stale windows purged by housekeeping (counter)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, HistogramVec, IntCounter, Registry, TextEncoder};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSION_DECISIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("admission_decisions_total", "Admission decisions by check and outcome"),
        &["check", "outcome"]
    ).expect("Failed to create admission decisions metric");

    pub static ref ADMISSION_CHECK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("admission_check_duration_seconds", "Admission check latency in seconds"),
        &["check"]
    ).expect("Failed to create admission check duration metric");

    pub static ref COST_RECORDED_USD_TOTAL: Counter = Counter::new(
        "cost_recorded_usd_total",
        "Total realized cost recorded against caller quotas"
    ).expect("Failed to create cost recorded metric");

    pub static ref COST_ESTIMATE_DRIFT_USD_TOTAL: Counter = Counter::new(
        "cost_estimate_drift_usd_total",
        "Total absolute difference between estimated and realized cost"
    ).expect("Failed to create cost drift metric");

    pub static ref STORE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "counter_store_errors_total",
        "Total number of counter store failures seen during admission"
    ).expect("Failed to create store errors metric");

    pub static ref WINDOWS_PURGED_TOTAL: IntCounter = IntCounter::new(
        "rate_windows_purged_total",
        "Total number of stale rate windows removed by housekeeping"
    ).expect("Failed to create windows purged metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSION_DECISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_CHECK_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(COST_RECORDED_USD_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COST_ESTIMATE_DRIFT_USD_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WINDOWS_PURGED_TOTAL.clone()))?;
    Ok(())
}

/// Count one admission decision
pub fn record_decision(check: &str, outcome: &str) {
    ADMISSION_DECISIONS_TOTAL
        .with_label_values(&[check, outcome])
        .inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
