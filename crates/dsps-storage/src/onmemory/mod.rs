//! In-process storage engine.
//!
//! Every operation serializes on one [`ContextLock`] covering all channels and JWT
//! revocations. Long-polling fetches release the lock between polls and wake up when
//! a publish signals `new_message`, with a 300 ms tick as a safety net.
//!
//! Data never leaves the process: do not use this engine when more than one server
//! process shares the channels.

mod ack_handle;
mod gc;
mod jwt;
mod pubsub;

pub use gc::{GcStat, OnmemoryStat};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dsps_sync::{ContextLock, DaemonNextRun, DaemonSystem};
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{
    ChannelId, ChannelProvider, Context, JwtExp, JwtJti, JwtStorage, Message, MessageLocator, PubSubStorage,
    SharedChannel, Storage, StorageError, SubscriberId, SubscriberLocator, SystemClock,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::OnmemoryStorageConfig;
use crate::deps::StorageDeps;

pub(crate) const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub(crate) const GC_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const POLLING_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug)]
pub(crate) struct StoredMessage {
    pub(crate) message: Message,
    pub(crate) clock: u64,
    pub(crate) expire_at: DateTime<Utc>,
}

pub(crate) struct SubscriberState {
    pub(crate) last_activity: DateTime<Utc>,
    /// Clock of the last acknowledged message.
    pub(crate) cursor: u64,
    pub(crate) queue: Vec<Arc<StoredMessage>>,
}

pub(crate) struct ChannelState {
    pub(crate) channel: SharedChannel,
    /// Clock of the latest message; the first message gets 1.
    pub(crate) clock: u64,
    pub(crate) subscribers: HashMap<SubscriberId, SubscriberState>,
    pub(crate) log: HashMap<MessageLocator, Arc<StoredMessage>>,
}

impl ChannelState {
    fn new(channel: SharedChannel) -> Self {
        Self {
            channel,
            clock: 0,
            subscribers: HashMap::new(),
            log: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) channels: HashMap<ChannelId, ChannelState>,
    pub(crate) revoked_jwts: HashMap<JwtJti, JwtExp>,
}

impl State {
    /// Channel entry, created on first reference when the provider accepts the id.
    pub(crate) fn channel_mut(
        &mut self,
        provider: &dyn ChannelProvider,
        id: &ChannelId,
    ) -> Result<&mut ChannelState, StorageError> {
        match self.channels.entry(id.clone()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let channel = provider.get(id)?;
                Ok(e.insert(ChannelState::new(channel)))
            }
        }
    }

    pub(crate) fn subscriber_mut(
        &mut self,
        provider: &dyn ChannelProvider,
        sl: &SubscriberLocator,
    ) -> Result<&mut SubscriberState, StorageError> {
        self.channel_mut(provider, &sl.channel_id)?
            .subscribers
            .get_mut(&sl.subscriber_id)
            .ok_or_else(|| StorageError::SubscriptionNotFound(sl.to_string()))
    }
}

/// Shared between the storage and its GC daemon.
pub(crate) struct Inner {
    pub(crate) state: ContextLock<State>,
    pub(crate) clock: Arc<dyn SystemClock>,
    pub(crate) channel_provider: Arc<dyn ChannelProvider>,
    pub(crate) new_message: Notify,
    pub(crate) stat: Mutex<OnmemoryStat>,
}

pub struct OnmemoryStorage {
    inner: Arc<Inner>,
    daemons: DaemonSystem,
    pubsub_enabled: bool,
    jwt_enabled: bool,
    run_gc_on_shutdown: bool,
}

impl OnmemoryStorage {
    /// Create the storage and start its GC daemon. Must be called inside a Tokio runtime.
    pub fn new(config: &OnmemoryStorageConfig, deps: &StorageDeps) -> Result<Self, StorageError> {
        let inner = Arc::new(Inner {
            state: ContextLock::new(State::default()),
            clock: Arc::clone(&deps.clock),
            channel_provider: Arc::clone(&deps.channel_provider),
            new_message: Notify::new(),
            stat: Mutex::new(OnmemoryStat::default()),
        });

        let daemons = DaemonSystem::with_logging_handler("dsps.storage.onmemory", deps.daemon_deps());
        let gc_target = Arc::clone(&inner);
        let started = Arc::new(AtomicBool::new(false));
        daemons
            .start("gc", move |ctx| {
                let inner = Arc::clone(&gc_target);
                let first_cycle = !started.swap(true, Ordering::SeqCst);
                async move {
                    if first_cycle {
                        return Ok(DaemonNextRun::after(GC_INTERVAL));
                    }
                    let ctx = ctx.with_timeout(GC_TIMEOUT);
                    match inner.gc(&ctx).await {
                        Ok(()) => Ok(DaemonNextRun::after(GC_INTERVAL)),
                        Err(e) => Err(DaemonNextRun::after(GC_INTERVAL).fail(e)),
                    }
                }
                .boxed()
            })
            .map_err(|e| StorageError::Internal(format!("failed to start on-memory GC: {e}")))?;

        Ok(Self {
            inner,
            daemons,
            pubsub_enabled: !config.disable_pub_sub,
            jwt_enabled: !config.disable_jwt,
            run_gc_on_shutdown: config.run_gc_on_shutdown,
        })
    }

    /// Evict expired subscribers, messages and JWT revocations.
    pub async fn gc(&self, ctx: &Context) -> Result<(), StorageError> {
        self.inner.gc(ctx).await
    }

    pub fn gc_stat(&self) -> OnmemoryStat {
        self.inner.stat.lock().clone()
    }
}

impl fmt::Display for OnmemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("onmemory")
    }
}

#[async_trait]
impl Storage for OnmemoryStorage {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError> {
        log_event!(debug, CATEGORY_STORAGE, "Closing on-memory storage...");
        if let Err(e) = self.daemons.shutdown(ctx).await {
            log_event!(warn, CATEGORY_STORAGE, "Failed to stop background routines", error = %e);
        }
        if self.run_gc_on_shutdown {
            self.inner.gc(ctx).await?;
        }

        let mut state = self.inner.state.lock(ctx).await?;
        state.channels.clear();
        drop(state);
        // Pending long-polls observe their subscriber is gone.
        self.inner.new_message.notify_waiters();
        Ok(())
    }

    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        // Fails on deadlock.
        let _state = self.inner.state.lock(ctx).await?;
        Ok(serde_json::Value::from("ok"))
    }

    async fn readiness(&self, _ctx: &Context) -> Result<serde_json::Value, StorageError> {
        Ok(serde_json::Value::from("ok"))
    }

    async fn stat(&self, _ctx: &Context) -> Result<serde_json::Value, StorageError> {
        serde_json::to_value(self.gc_stat())
            .map_err(|e| StorageError::Internal(format!("failed to encode on-memory stat: {e}")))
    }

    fn as_pubsub(&self) -> Option<&dyn PubSubStorage> {
        if self.pubsub_enabled {
            Some(self)
        } else {
            None
        }
    }

    fn as_jwt(&self) -> Option<&dyn JwtStorage> {
        if self.jwt_enabled {
            Some(self)
        } else {
            None
        }
    }

    fn no_file_pressure(&self) -> usize {
        0
    }
}
