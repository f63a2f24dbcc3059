//! Storage wrapper that opens a telemetry span per operation.
//!
//! Spans are named after the wrapped storage's id (`#root` for the top-level
//! multiplexer). Backend failures are also reported to Sentry; business errors
//! and cancellations are not.

use async_trait::async_trait;
use dsps_telemetry::{OperationSpan, Sentry, Telemetry};
use dsps_types::{
    AckHandle, Context, FetchResult, JwtExp, JwtJti, JwtStorage, Message, MessageLocator, PubSubStorage, Storage,
    StorageError, StorageId, SubscriberLocator,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::deps::StorageDeps;

pub struct TracingStorage {
    inner: Arc<dyn Storage>,
    id: StorageId,
    telemetry: Telemetry,
    sentry: Arc<dyn Sentry>,
    calls: Mutex<BTreeMap<&'static str, u64>>,
}

impl TracingStorage {
    pub fn new(inner: Arc<dyn Storage>, id: StorageId, deps: &StorageDeps) -> Self {
        Self {
            inner,
            id,
            telemetry: deps.telemetry.clone(),
            sentry: Arc::clone(&deps.sentry),
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> &StorageId {
        &self.id
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    /// Number of calls per operation name.
    pub fn call_counts(&self) -> BTreeMap<&'static str, u64> {
        self.calls.lock().clone()
    }

    async fn traced<T, Fut>(
        &self,
        operation: &'static str,
        annotate: impl FnOnce(&OperationSpan),
        fut: Fut,
    ) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        *self.calls.lock().entry(operation).or_default() += 1;
        let span = self.telemetry.start_storage_span(self.id.as_str(), operation);
        annotate(&span);
        let result = fut.instrument(span.span().clone()).await;
        if let Err(e) = &result {
            if !e.is_non_fatal() && !e.is_canceled() {
                self.sentry.record_error(e);
            }
        }
        span.finish(result)
    }

    fn pubsub(&self) -> Result<&dyn PubSubStorage, StorageError> {
        self.inner
            .as_pubsub()
            .ok_or_else(|| StorageError::Internal(format!("[BUG] storage \"{}\" does not support pubsub", self.id)))
    }

    fn jwt(&self) -> Result<&dyn JwtStorage, StorageError> {
        self.inner
            .as_jwt()
            .ok_or_else(|| StorageError::Internal(format!("[BUG] storage \"{}\" does not support jwt", self.id)))
    }
}

impl fmt::Display for TracingStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[async_trait]
impl Storage for TracingStorage {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError> {
        self.traced("Shutdown", |_| {}, self.inner.shutdown(ctx)).await
    }

    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.traced("Liveness", |_| {}, self.inner.liveness(ctx)).await
    }

    async fn readiness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.traced("Readiness", |_| {}, self.inner.readiness(ctx)).await
    }

    async fn stat(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        let stat = self.traced("Stat", |_| {}, self.inner.stat(ctx)).await?;
        Ok(json!({
            "calls": self.call_counts(),
            "storage": stat,
        }))
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
impl PubSubStorage for TracingStorage {
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "NewSubscriber",
            |span| span.set_subscriber(&sl.channel_id, &sl.subscriber_id),
            pubsub.new_subscriber(ctx, sl),
        )
        .await
    }

    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "RemoveSubscriber",
            |span| span.set_subscriber(&sl.channel_id, &sl.subscriber_id),
            pubsub.remove_subscriber(ctx, sl),
        )
        .await
    }

    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "PublishMessages",
            |span| {
                if let Some(first) = msgs.first() {
                    span.set_channel(first.channel_id());
                }
            },
            pubsub.publish_messages(ctx, msgs),
        )
        .await
    }

    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "FetchMessages",
            |span| span.set_subscriber(&sl.channel_id, &sl.subscriber_id),
            pubsub.fetch_messages(ctx, sl, max, wait),
        )
        .await
    }

    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "AcknowledgeMessages",
            |span| span.set_subscriber(&handle.locator.channel_id, &handle.locator.subscriber_id),
            pubsub.acknowledge_messages(ctx, handle),
        )
        .await
    }

    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError> {
        let pubsub = self.pubsub()?;
        self.traced(
            "IsOldMessages",
            |span| span.set_subscriber(&sl.channel_id, &sl.subscriber_id),
            pubsub.is_old_messages(ctx, sl, msgs),
        )
        .await
    }
}

#[async_trait]
impl JwtStorage for TracingStorage {
    async fn revoke_jwt(&self, ctx: &Context, exp: JwtExp, jti: &JwtJti) -> Result<(), StorageError> {
        let jwt = self.jwt()?;
        self.traced("RevokeJwt", |span| span.set_jti(jti), jwt.revoke_jwt(ctx, exp, jti))
            .await
    }

    async fn is_revoked_jwt(&self, ctx: &Context, jti: &JwtJti) -> Result<bool, StorageError> {
        let jwt = self.jwt()?;
        self.traced("IsRevokedJwt", |span| span.set_jti(jti), jwt.is_revoked_jwt(ctx, jti))
            .await
    }
}
