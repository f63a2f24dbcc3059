//! Prometheus metrics for DSPS.
//!
//! All metrics follow the naming convention: `dsps_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: storage operation outcomes, daemon cycles, webhook attempts
//! - **Histogram**: operation and cycle durations

use lazy_static::lazy_static;
use prometheus::{exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // STORAGE METRICS
    // =========================================================================

    /// Storage operations by storage id, operation and outcome (ok/error)
    pub static ref STORAGE_OPERATIONS: CounterVec = CounterVec::new(
        Opts::new("dsps_storage_operations_total", "Storage operations by outcome"),
        &["storage", "operation", "outcome"]
    ).expect("metric creation failed");

    /// Storage operation duration (includes long-poll waits)
    pub static ref STORAGE_OPERATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "dsps_storage_operation_duration_seconds",
            "Time spent in storage operations"
        ).buckets(exponential_buckets(0.0005, 2.0, 18).unwrap_or_default()),
        &["storage", "operation"]
    ).expect("metric creation failed");

    // =========================================================================
    // DAEMON METRICS
    // =========================================================================

    /// Daemon cycles by system, daemon name and outcome (ok/error/panic)
    pub static ref DAEMON_CYCLES: CounterVec = CounterVec::new(
        Opts::new("dsps_daemon_cycles_total", "Daemon cycles by outcome"),
        &["system", "daemon", "outcome"]
    ).expect("metric creation failed");

    // =========================================================================
    // OUTGOING WEBHOOK METRICS
    // =========================================================================

    /// Outgoing webhook HTTP attempts by method and outcome (status code or "error")
    pub static ref WEBHOOK_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("dsps_webhook_attempts_total", "Outgoing webhook HTTP attempts"),
        &["method", "outcome"]
    ).expect("metric creation failed");

    // =========================================================================
    // ERROR METRICS
    // =========================================================================

    /// Errors recorded through the telemetry facade
    pub static ref RECORDED_ERRORS: CounterVec = CounterVec::new(
        Opts::new("dsps_errors_total", "Errors recorded by span kind"),
        &["kind"]
    ).expect("metric creation failed");
}

/// Handle keeping the registry alive.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(STORAGE_OPERATIONS.clone()),
        Box::new(STORAGE_OPERATION_DURATION.clone()),
        Box::new(DAEMON_CYCLES.clone()),
        Box::new(WEBHOOK_ATTEMPTS.clone()),
        Box::new(RECORDED_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
