//! Storage capability traits.
//!
//! A [`Storage`] always supports probes and shutdown. Pub/sub messaging and JWT
//! revocation are optional capabilities discovered through [`Storage::as_pubsub`]
//! and [`Storage::as_jwt`].

use crate::context::Context;
use crate::errors::StorageError;
use crate::jwt::{JwtExp, JwtJti};
use crate::message::{AckHandle, Message, MessageLocator, SubscriberLocator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Result of a fetch.
///
/// `ack_handle` is `None` exactly when `messages` is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub messages: Vec<Message>,
    pub more_messages: bool,
    pub ack_handle: Option<AckHandle>,
}

impl FetchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait Storage: Send + Sync + fmt::Display {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError>;

    /// Liveness probe; returns a JSON-encodable value.
    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError>;

    /// Readiness probe; returns a JSON-encodable value.
    async fn readiness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError>;

    /// Runtime statistics.
    async fn stat(&self, ctx: &Context) -> Result<serde_json::Value, StorageError>;

    fn as_pubsub(&self) -> Option<&dyn PubSubStorage>;

    fn as_jwt(&self) -> Option<&dyn JwtStorage>;

    /// Estimated number of file descriptors this storage may hold.
    fn no_file_pressure(&self) -> usize;
}

#[async_trait]
pub trait PubSubStorage: Send + Sync {
    /// Idempotent: creating an existing subscriber keeps its cursor.
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError>;

    /// Idempotent: removing a missing subscriber succeeds.
    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError>;

    /// All messages must belong to the same channel. Duplicate ids are skipped.
    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError>;

    /// Long-poll for up to `max` unacknowledged messages, waiting at most `wait`.
    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError>;

    /// Advance the subscriber's cursor. Stale handles are a no-op.
    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError>;

    /// `true` when the message was acknowledged or published before the subscriber
    /// existed; `false` otherwise, including unknown messages.
    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError>;
}

#[async_trait]
pub trait JwtStorage: Send + Sync {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError>;

    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError>;
}
