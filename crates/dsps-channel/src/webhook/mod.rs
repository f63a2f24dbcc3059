//! Outgoing webhooks.
//!
//! A [`ClientTemplate`] is built once per webhook configuration and owns the HTTP
//! connection pool. Each resolved channel asks the template for a [`Client`] bound to
//! its template environment; clients share the pool of their template.

mod body;
mod client;
mod multiplex;
mod retry;
mod template;

pub use body::{encode_webhook_body, WebhookBody, WEBHOOK_BODY_TYPE};
pub use client::ClientImpl;
pub use multiplex::MultiplexClient;
pub use template::ClientTemplate;

use async_trait::async_trait;
use dsps_types::{CancelCause, Context, Message, TemplateError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("outgoing-webhook client already closed")]
    Closed,

    #[error("failed to expand template of webhook URL \"{template}\": {source}")]
    UrlTemplate {
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("failed to expand template of webhook header \"{name}\", \"{template}\": {source}")]
    HeaderTemplate {
        name: String,
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("outgoing webhook URL must be specified")]
    MissingUrl,

    #[error("invalid outgoing webhook header \"{name}\": {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to generate outgoing webhook body: {0}")]
    Body(#[source] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("status code {0} returned")]
    Status(u16),

    #[error("outgoing webhook request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error(transparent)]
    Canceled(#[from] CancelCause),

    /// Failure of one client of a [`MultiplexClient`].
    #[error("{client}: {source}")]
    Client {
        client: String,
        #[source]
        source: Box<WebhookError>,
    },
}

/// Delivers messages to one endpoint (or several, for [`MultiplexClient`]).
#[async_trait]
pub trait Client: Send + Sync + fmt::Display {
    async fn send(&self, ctx: &Context, msg: &Message) -> Result<(), WebhookError>;

    /// Reject further sends. In-flight sends complete normally.
    async fn close(&self);
}
