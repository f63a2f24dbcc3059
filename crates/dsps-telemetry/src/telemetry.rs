//! Telemetry facade used by storages, daemons and webhook clients.
//!
//! A span is opened per storage operation, per daemon cycle and per outgoing HTTP
//! request. Dropping the [`OperationSpan`] records its duration and outcome.

use std::fmt;
use std::time::Instant;
use tracing::field::Empty;
use tracing::Span;

use crate::metrics::{DAEMON_CYCLES, RECORDED_ERRORS, STORAGE_OPERATIONS, STORAGE_OPERATION_DURATION, WEBHOOK_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Storage,
    Daemon,
    Http,
}

impl SpanKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Daemon => "daemon",
            Self::Http => "http",
        }
    }
}

/// Creates spans and records errors. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics_enabled: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Telemetry that records spans and Prometheus metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics_enabled: true,
        }
    }

    /// Telemetry that still opens spans but never touches the metric registry.
    #[must_use]
    pub fn without_metrics() -> Self {
        Self {
            metrics_enabled: false,
        }
    }

    /// Span of one storage operation, e.g. `("#root", "FetchMessages")`.
    pub fn start_storage_span(&self, storage_id: &str, operation: &'static str) -> OperationSpan {
        let span = tracing::info_span!(
            "storage",
            otel.name = %format!("DSPS storage {operation}"),
            storage.id = %storage_id,
            storage.operation = operation,
            channel.id = Empty,
            subscriber.id = Empty,
            jwt.jti = Empty,
            error = Empty,
        );
        OperationSpan::new(self, SpanKind::Storage, span, [storage_id.to_string(), operation.to_string()])
    }

    /// Span of one daemon cycle.
    pub fn start_daemon_span(&self, system: &str, name: &str) -> OperationSpan {
        let span = tracing::info_span!(
            "daemon",
            otel.name = %format!("DSPS daemon {system}/{name}"),
            daemon.system = %system,
            daemon.name = %name,
            error = Empty,
        );
        OperationSpan::new(self, SpanKind::Daemon, span, [system.to_string(), name.to_string()])
    }

    /// Span of one outgoing HTTP request.
    pub fn start_http_span(&self, method: &str, url: &str) -> OperationSpan {
        let span = tracing::info_span!(
            "http.client",
            otel.name = %format!("HTTP {method}"),
            http.method = %method,
            http.url = %url,
            http.status_code = Empty,
            error = Empty,
        );
        OperationSpan::new(self, SpanKind::Http, span, [method.to_string(), String::new()])
    }

    /// Record an error that is not attached to a particular span.
    pub fn record_error(&self, kind: SpanKind, err: &dyn fmt::Display) {
        tracing::error!(kind = kind.as_str(), error = %err, "error recorded");
        if self.metrics_enabled {
            RECORDED_ERRORS.with_label_values(&[kind.as_str()]).inc();
        }
    }
}

/// An open telemetry span. Records metrics on drop.
pub struct OperationSpan {
    kind: SpanKind,
    span: Span,
    labels: [String; 2],
    status: Option<String>,
    failed: bool,
    started: Instant,
    metrics_enabled: bool,
}

impl OperationSpan {
    fn new(telemetry: &Telemetry, kind: SpanKind, span: Span, labels: [String; 2]) -> Self {
        Self {
            kind,
            span,
            labels,
            status: None,
            failed: false,
            started: Instant::now(),
            metrics_enabled: telemetry.metrics_enabled,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn set_subscriber(&self, channel_id: &dyn fmt::Display, subscriber_id: &dyn fmt::Display) {
        self.span.record("channel.id", tracing::field::display(channel_id));
        self.span.record("subscriber.id", tracing::field::display(subscriber_id));
    }

    pub fn set_channel(&self, channel_id: &dyn fmt::Display) {
        self.span.record("channel.id", tracing::field::display(channel_id));
    }

    pub fn set_jti(&self, jti: &dyn fmt::Display) {
        self.span.record("jwt.jti", tracing::field::display(jti));
    }

    pub fn set_status_code(&mut self, status: u16) {
        self.span.record("http.status_code", status);
        self.status = Some(status.to_string());
    }

    /// Mark the span failed.
    pub fn record_error(&mut self, err: &dyn fmt::Display) {
        self.failed = true;
        self.span.record("error", tracing::field::display(err));
        if self.metrics_enabled {
            RECORDED_ERRORS.with_label_values(&[self.kind.as_str()]).inc();
        }
    }

    /// Record the outcome of `result` and hand it back.
    pub fn finish<T, E: fmt::Display>(mut self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        if !self.metrics_enabled {
            return;
        }
        let outcome = if self.failed { "error" } else { "ok" };
        let first = self.labels[0].as_str();
        let second = self.labels[1].as_str();
        match self.kind {
            SpanKind::Storage => {
                STORAGE_OPERATIONS.with_label_values(&[first, second, outcome]).inc();
                STORAGE_OPERATION_DURATION
                    .with_label_values(&[first, second])
                    .observe(self.started.elapsed().as_secs_f64());
            }
            SpanKind::Daemon => {
                DAEMON_CYCLES.with_label_values(&[first, second, outcome]).inc();
            }
            SpanKind::Http => {
                let outcome = self.status.as_deref().unwrap_or(outcome);
                WEBHOOK_ATTEMPTS.with_label_values(&[first, outcome]).inc();
            }
        }
    }
}
