//! Channel resolution seam between storages and channel configuration.

use crate::context::Context;
use crate::errors::{BoxError, StorageError};
use crate::ids::ChannelId;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub type SharedChannel = Arc<dyn Channel>;

/// A configured channel.
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> &ChannelId;

    /// How long messages and idle subscribers are retained.
    fn expire(&self) -> Duration;

    /// Deliver `msg` to every outgoing webhook of this channel.
    async fn send_outgoing_webhook(&self, ctx: &Context, msg: &Message) -> Result<(), BoxError>;
}

/// Resolves a channel id to its configuration.
///
/// Returns [`StorageError::InvalidChannel`] for ids no configuration accepts.
pub trait ChannelProvider: Send + Sync {
    fn get(&self, id: &ChannelId) -> Result<SharedChannel, StorageError>;

    /// Estimated number of file descriptors held by channel resources (webhook pools).
    fn no_file_pressure(&self) -> usize;

    /// Release webhook connection pools.
    fn shutdown(&self) {}
}
