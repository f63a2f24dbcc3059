//! # DSPS Channel
//!
//! Resolves channel ids to configured channels and delivers published messages to
//! the outgoing webhooks of those channels.
//!
//! ## Resolution
//!
//! The configuration is an ordered list of channel definitions ("atoms"), each with
//! a regex matched against the whole channel id. A channel is made of every atom that
//! accepts its id: its `expire` is the largest one and its webhooks are the union.
//! Unknown ids yield [`StorageError::InvalidChannel`].
//!
//! [`CachedChannelProvider`] memoizes resolution. Entries live for the channel's
//! expiry after their last use; unknown ids are cached for five minutes.
//!
//! ## Outgoing webhooks
//!
//! See [`webhook`]. Delivery retries with exponential backoff and jitter; permanent
//! client errors (401, 403, 410, ...) are not retried.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod atom;
mod cache;
mod channel;
pub mod config;
mod provider;
pub mod webhook;

pub use cache::{CachedChannelProvider, NEGATIVE_CACHE_EXPIRE};
pub use channel::ChannelImpl;
pub use config::{
    postprocess_channels_config, ChannelConfig, ChannelRegex, ChannelsConfig, OutgoingWebhookConfig,
    OutgoingWebhookConnectionConfig, OutgoingWebhookRetryConfig,
};
pub use provider::{new_channel_provider, ChannelProviderImpl, ProviderDeps};
pub use webhook::{Client, ClientTemplate, MultiplexClient, WebhookError};

use dsps_types::{ConfigError, StorageError};
use thiserror::Error;

/// Errors while building channels or the channel provider.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("error on {path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<ChannelError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to evaluate channel configuration /{regex}/ to channel \"{channel_id}\"")]
    Evaluate { regex: String, channel_id: String },

    #[error("failed to setup outgoing webhook of {target}: {source}")]
    WebhookSetup {
        target: String,
        #[source]
        source: WebhookError,
    },
}

impl From<ChannelError> for StorageError {
    fn from(err: ChannelError) -> Self {
        StorageError::backend("unable to resolve channel", err)
    }
}
