//! # DSPS Telemetry
//!
//! Observability for the DSPS storages, daemons and outgoing webhooks.
//!
//! ## Components
//!
//! - **Logging**: `tracing` with an `EnvFilter` and a pretty or JSON `fmt` layer
//! - **Tracing**: optional OTLP export through `tracing-opentelemetry`
//! - **Metrics**: Prometheus counters/histograms per storage operation, daemon cycle
//!   and webhook attempt
//! - **Error reporting**: the [`Sentry`] facade (breadcrumbs + error capture)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dsps_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).await.expect("telemetry");
//!     // storages, channel provider, ...
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `dsps` | Service name in traces |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP endpoint; export disabled when unset |
//! | `DSPS_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `DSPS_JSON_LOGS` | `false` | JSON formatted logs |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;
mod sentry;
mod telemetry;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, register_metrics, MetricsHandle};
pub use sentry::{Breadcrumb, BreadcrumbLevel, EmptySentry, Sentry, StubSentry};
pub use telemetry::{OperationSpan, SpanKind, Telemetry};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Log category of storage engines.
pub const CATEGORY_STORAGE: &str = "storage";
/// Log category of outgoing webhooks.
pub const CATEGORY_OUTGOING_WEBHOOK: &str = "outgoing-webhook";
/// Log category of background daemons.
pub const CATEGORY_DAEMON: &str = "daemon";

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging, tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending traces.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    let tracing_guard = tracing_setup::init_tracing(&config).await?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
