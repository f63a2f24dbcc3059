//! Error-reporting facade.
//!
//! Production deployments plug an error tracker behind [`Sentry`]; without one,
//! [`EmptySentry`] discards everything. [`StubSentry`] records calls for tests.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Trail entry attached to the next recorded error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breadcrumb {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub level: BreadcrumbLevel,
    pub message: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

pub trait Sentry: Send + Sync {
    fn add_breadcrumb(&self, breadcrumb: Breadcrumb);

    fn record_error(&self, err: &(dyn std::error::Error + 'static));
}

/// Discards breadcrumbs and errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySentry;

impl Sentry for EmptySentry {
    fn add_breadcrumb(&self, _breadcrumb: Breadcrumb) {}

    fn record_error(&self, _err: &(dyn std::error::Error + 'static)) {}
}

#[derive(Debug, Default)]
struct StubState {
    breadcrumbs: Vec<Breadcrumb>,
    errors: Vec<String>,
}

/// Records everything it is given.
#[derive(Debug, Clone, Default)]
pub struct StubSentry {
    state: Arc<Mutex<StubState>>,
}

impl StubSentry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.state.lock().breadcrumbs.clone()
    }

    /// Display strings of the recorded errors, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().errors.last().cloned()
    }
}

impl Sentry for StubSentry {
    fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
        self.state.lock().breadcrumbs.push(breadcrumb);
    }

    fn record_error(&self, err: &(dyn std::error::Error + 'static)) {
        self.state.lock().errors.push(err.to_string());
    }
}
