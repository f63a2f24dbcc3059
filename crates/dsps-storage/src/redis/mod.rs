//! Redis storage engine (single node or cluster).
//!
//! All keys of a channel share the `{channel-id}` hash tag and every multi-key update
//! runs as one Lua script, so per-channel operations stay atomic under cluster routing.
//! Long-polling fetches sleep on the PSUBSCRIBE [`dispatcher`] and wake up when a
//! publisher announces new messages with a PUBLISH.
//!
//! ```text
//!   publish ──EVALSHA publishMessageScript──► c.{ch}.clock / c.{ch}.mid.* / c.{ch}.m.*
//!           └─PUBLISH dsps.c.{ch}───────────► dispatcher ──► waiting fetches
//! ```

mod ack_handle;
mod clock;
mod connection;
mod dispatcher;
mod envelope;
#[cfg(test)]
mod fake;
mod jwt;
mod keys;
mod pubsub;
mod scripts;

use async_trait::async_trait;
use dsps_sync::{DaemonError, DaemonNextRun, DaemonSystem};
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{
    ChannelId, ChannelProvider, Context, JwtStorage, PubSubStorage, Storage, StorageError, SystemClock,
};
use futures::FutureExt;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisStorageConfig;
use crate::deps::StorageDeps;
use connection::RedisCmd;
use dispatcher::Dispatcher;
use scripts::Scripts;

/// Added to the channel expiry for every TTL so that small clock drift between
/// servers and Redis cannot evict live data.
pub(crate) const TTL_MARGIN: Duration = Duration::from_secs(15);

/// Reload interval of the Lua scripts (Redis drops its script cache on restart).
pub(crate) const SCRIPT_RELOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Inner {
    cmd: Arc<dyn RedisCmd>,
    scripts: Scripts,
}

pub struct RedisStorage {
    inner: Arc<Inner>,
    daemons: DaemonSystem,
    dispatcher: Option<Dispatcher>,
    clock: Arc<dyn SystemClock>,
    channel_provider: Arc<dyn ChannelProvider>,
    pubsub_enabled: bool,
    jwt_enabled: bool,
    max_connections: usize,
    topology: &'static str,
}

impl RedisStorage {
    /// Connect, load the Lua scripts and start the background routines.
    pub async fn new(ctx: &Context, config: &RedisStorageConfig, deps: &StorageDeps) -> Result<Self, StorageError> {
        let cmd = connection::connect(ctx, config).await?;
        Self::with_cmd(ctx, cmd, config, deps).await
    }

    async fn with_cmd(
        ctx: &Context,
        cmd: Arc<dyn RedisCmd>,
        config: &RedisStorageConfig,
        deps: &StorageDeps,
    ) -> Result<Self, StorageError> {
        let inner = Arc::new(Inner {
            cmd,
            scripts: Scripts::new(),
        });
        inner.scripts.load(ctx, inner.cmd.as_ref()).await?;

        let daemons = DaemonSystem::with_logging_handler("dsps.storage.redis", deps.daemon_deps());
        let loader = Arc::clone(&inner);
        let started = Arc::new(AtomicBool::new(false));
        daemons
            .start("script-loader", move |ctx| {
                let inner = Arc::clone(&loader);
                let first_cycle = !started.swap(true, Ordering::SeqCst);
                async move {
                    let next = DaemonNextRun::after(SCRIPT_RELOAD_INTERVAL);
                    if first_cycle {
                        return Ok(next);
                    }
                    match inner.scripts.load(&ctx, inner.cmd.as_ref()).await {
                        Ok(()) => Ok(next),
                        Err(e) => Err::<_, DaemonError>(next.fail(e)),
                    }
                }
                .boxed()
            })
            .map_err(|e| StorageError::Internal(format!("failed to start Redis script loader: {e}")))?;

        let dispatcher = if config.disable_pub_sub {
            None
        } else {
            Some(
                Dispatcher::start(&daemons, Arc::clone(&inner.cmd))
                    .map_err(|e| StorageError::Internal(format!("failed to start Redis PSUBSCRIBE dispatcher: {e}")))?,
            )
        };

        Ok(Self {
            inner,
            daemons,
            dispatcher,
            clock: Arc::clone(&deps.clock),
            channel_provider: Arc::clone(&deps.channel_provider),
            pubsub_enabled: !config.disable_pub_sub,
            jwt_enabled: !config.disable_jwt,
            max_connections: config.connection.max,
            topology: if config.is_cluster() { "cluster" } else { "single-node" },
        })
    }

    fn cmd(&self) -> &dyn RedisCmd {
        self.inner.cmd.as_ref()
    }

    /// TTL in seconds of the keys of `channel_id`.
    pub(crate) fn channel_ttl_sec(&self, channel_id: &ChannelId) -> Result<u64, StorageError> {
        let channel = self.channel_provider.get(channel_id)?;
        Ok(ttl_sec(channel.expire() + TTL_MARGIN))
    }
}

fn ttl_sec(ttl: Duration) -> u64 {
    ttl.as_secs_f64().ceil() as u64
}

impl fmt::Display for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("redis")
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError> {
        log_event!(debug, CATEGORY_STORAGE, "Closing Redis storage...");
        if let Err(e) = self.daemons.shutdown(ctx).await {
            log_event!(warn, CATEGORY_STORAGE, "Failed to stop background routines", error = %e);
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.close().await;
        }
        self.cmd().close();
        Ok(())
    }

    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.cmd()
            .ping(ctx)
            .await
            .map_err(|e| e.into_storage_error("Redis PING failed"))?;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher
                .check_availability(ctx)
                .await
                .map_err(|reason| StorageError::backend("Redis PSUBSCRIBE unavailable", reason))?;
        }
        Ok(json!({ "ping": "ok", "pubsub": self.dispatcher.is_some() }))
    }

    async fn readiness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.cmd()
            .ping(ctx)
            .await
            .map_err(|e| e.into_storage_error("Redis PING failed"))?;
        Ok(json!({ "ping": "ok" }))
    }

    async fn stat(&self, _ctx: &Context) -> Result<serde_json::Value, StorageError> {
        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => Some(dispatcher.stat().await),
            None => None,
        };
        Ok(json!({
            "topology": self.topology,
            "maxConnections": self.max_connections,
            "dispatcher": dispatcher,
        }))
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
        self.max_connections
    }
}
