//! Test doubles shared by the storage tests and the workspace test suite.

use async_trait::async_trait;
use dsps_telemetry::{EmptySentry, Telemetry};
use dsps_types::{
    AckHandle, BoxError, Channel, ChannelId, ChannelProvider, Context, FetchResult, JwtExp, JwtJti, JwtStorage,
    Message, MessageLocator, PubSubStorage, SharedChannel, Storage, StorageError, StubSystemClock, SubscriberLocator,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::deps::StorageDeps;

/// Channel id the stub provider rejects.
pub const DISABLED_CHANNEL: &str = "disabled-channel";

/// Expiry of every stub channel.
pub const STUB_CHANNEL_EXPIRE: Duration = Duration::from_secs(5 * 60);

pub struct StubChannel {
    id: ChannelId,
    expire: Duration,
}

#[async_trait]
impl Channel for StubChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn expire(&self) -> Duration {
        self.expire
    }

    async fn send_outgoing_webhook(&self, _ctx: &Context, _msg: &Message) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Accepts every channel except [`DISABLED_CHANNEL`].
#[derive(Debug, Clone)]
pub struct StubChannelProvider {
    expire: Duration,
}

impl Default for StubChannelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubChannelProvider {
    pub fn new() -> Self {
        Self {
            expire: STUB_CHANNEL_EXPIRE,
        }
    }

    pub fn with_expire(expire: Duration) -> Self {
        Self { expire }
    }
}

impl ChannelProvider for StubChannelProvider {
    fn get(&self, id: &ChannelId) -> Result<SharedChannel, StorageError> {
        if id.as_str() == DISABLED_CHANNEL {
            return Err(StorageError::InvalidChannel(id.to_string()));
        }
        Ok(Arc::new(StubChannel {
            id: id.clone(),
            expire: self.expire,
        }))
    }

    fn no_file_pressure(&self) -> usize {
        0
    }
}

/// Dependencies backed by a stub clock, the stub provider and no-op telemetry.
pub fn stub_deps(clock: StubSystemClock) -> StorageDeps {
    StorageDeps {
        clock: Arc::new(clock),
        channel_provider: Arc::new(StubChannelProvider::new()),
        telemetry: Telemetry::without_metrics(),
        sentry: Arc::new(EmptySentry),
    }
}

/// Wraps a storage and fails every call while killed.
pub struct FaultyStorage {
    inner: Arc<dyn Storage>,
    killed: AtomicBool,
    shutdowns: AtomicUsize,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            killed: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn revive(&self) {
        self.killed.store(false, Ordering::SeqCst);
    }

    /// Number of `shutdown` calls received, including failed ones.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(StorageError::backend("storage killed", "injected fault"));
        }
        Ok(())
    }

    fn pubsub(&self) -> Result<&dyn PubSubStorage, StorageError> {
        self.check()?;
        self.inner
            .as_pubsub()
            .ok_or_else(|| StorageError::Internal("pubsub not supported".into()))
    }

    fn jwt(&self) -> Result<&dyn JwtStorage, StorageError> {
        self.check()?;
        self.inner
            .as_jwt()
            .ok_or_else(|| StorageError::Internal("jwt not supported".into()))
    }
}

impl fmt::Display for FaultyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faulty({})", self.inner)
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.shutdown(ctx).await
    }

    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.check()?;
        self.inner.liveness(ctx).await
    }

    async fn readiness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.check()?;
        self.inner.readiness(ctx).await
    }

    async fn stat(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.check()?;
        self.inner.stat(ctx).await
    }

    fn as_pubsub(&self) -> Option<&dyn PubSubStorage> {
        self.inner.as_pubsub().map(|_| self as &dyn PubSubStorage)
    }

    fn as_jwt(&self) -> Option<&dyn JwtStorage> {
        self.inner.as_jwt().map(|_| self as &dyn JwtStorage)
    }

    fn no_file_pressure(&self) -> usize {
        self.inner.no_file_pressure()
    }
}

#[async_trait]
impl PubSubStorage for FaultyStorage {
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        self.pubsub()?.new_subscriber(ctx, sl).await
    }

    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        self.pubsub()?.remove_subscriber(ctx, sl).await
    }

    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError> {
        self.pubsub()?.publish_messages(ctx, msgs).await
    }

    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError> {
        self.pubsub()?.fetch_messages(ctx, sl, max, wait).await
    }

    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError> {
        self.pubsub()?.acknowledge_messages(ctx, handle).await
    }

    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError> {
        self.pubsub()?.is_old_messages(ctx, sl, msgs).await
    }
}

#[async_trait]
impl JwtStorage for FaultyStorage {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError> {
        self.jwt()?.revoke_jwt(ctx, exp, jti).await
    }

    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError> {
        self.jwt()?.is_revoked_jwt(ctx, jti).await
    }
}
