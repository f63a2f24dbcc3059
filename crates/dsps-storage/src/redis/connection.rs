//! Redis command seam.
//!
//! Storage code talks to Redis only through [`RedisCmd`], so fetch/publish paths can be
//! exercised against a fake in unit tests. [`RedisCmdImpl`] is the real implementation
//! over a multiplexed single-node or cluster connection.

use async_trait::async_trait;
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{CancelCause, Context, StorageError};
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo, RedisError, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{RedisRetryConfig, RedisStorageConfig};

#[derive(Debug, Error)]
pub(crate) enum RedisCmdError {
    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error("Redis command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Redis connection already closed")]
    Closed,

    #[error(transparent)]
    Canceled(#[from] CancelCause),
}

impl RedisCmdError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout(),
            Self::Timeout(_) => true,
            Self::Closed | Self::Canceled(_) => false,
        }
    }

    /// Wrap into a storage error, keeping cancellation recognizable.
    pub(crate) fn into_storage_error(self, context: impl Into<String>) -> StorageError {
        match self {
            Self::Canceled(cause) => StorageError::Canceled(cause),
            other => StorageError::backend(context, other),
        }
    }
}

/// A Lua script together with its source, so that it can be (re)loaded explicitly.
pub(crate) struct RedisScript {
    name: &'static str,
    source: &'static str,
    script: redis::Script,
}

impl RedisScript {
    pub(crate) fn new(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            source,
            script: redis::Script::new(source),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn hash(&self) -> &str {
        self.script.get_hash()
    }
}

impl std::fmt::Debug for RedisScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisScript").field("name", &self.name).finish()
    }
}

/// Commands the storage issues. Every call honors the cancellation of `ctx`.
#[async_trait]
pub(crate) trait RedisCmd: Send + Sync {
    async fn ping(&self, ctx: &Context) -> Result<(), RedisCmdError>;

    async fn publish(&self, ctx: &Context, channel: &str, message: &str) -> Result<(), RedisCmdError>;

    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<String>, RedisCmdError>;

    /// One value per key, `None` for missing keys. No round trip when `keys` is empty.
    async fn mget(&self, ctx: &Context, keys: &[String]) -> Result<Vec<Option<String>>, RedisCmdError>;

    async fn set_ex(&self, ctx: &Context, key: &str, value: &str, ttl_sec: u64) -> Result<(), RedisCmdError>;

    /// Set the TTL of every key in one pipeline.
    async fn expire(&self, ctx: &Context, keys: &[String], ttl_sec: u64) -> Result<(), RedisCmdError>;

    async fn del(&self, ctx: &Context, key: &str) -> Result<(), RedisCmdError>;

    async fn load_script(&self, ctx: &Context, script: &RedisScript) -> Result<(), RedisCmdError>;

    /// EVALSHA falling back to EVAL when the script cache misses. `None` is a nil reply.
    async fn run_script(
        &self,
        ctx: &Context,
        script: &RedisScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, RedisCmdError>;

    /// Open a dedicated PSUBSCRIBE connection; the stream yields channel names of
    /// published messages and ends when the connection drops.
    async fn psubscribe(&self, ctx: &Context, pattern: &str) -> Result<BoxStream<'static, String>, RedisCmdError>;

    /// Stop issuing commands; later calls fail with [`RedisCmdError::Closed`].
    fn close(&self);
}

pub(crate) struct RedisCmdImpl<C> {
    conn: C,
    /// Client of the node that serves PSUBSCRIBE.
    pubsub_client: redis::Client,
    permits: Semaphore,
    timeout: Duration,
    retry: RedisRetryConfig,
}

fn jittered(retry: &RedisRetryConfig) -> Duration {
    let jitter = retry.interval_jitter.as_secs_f64() * rand::random::<f64>();
    retry.interval + Duration::from_secs_f64(jitter)
}

impl<C> RedisCmdImpl<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Run `f` under the pool limit, the command timeout and the retry policy.
    async fn execute<T, F, Fut>(&self, ctx: &Context, mut f: F) -> Result<T, RedisCmdError>
    where
        F: FnMut(C) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let _permit = ctx
            .run(self.permits.acquire())
            .await?
            .map_err(|_| RedisCmdError::Closed)?;

        let mut attempt = 0;
        loop {
            let err = match ctx.run(tokio::time::timeout(self.timeout, f(self.conn.clone()))).await? {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => RedisCmdError::Redis(e),
                Err(_) => RedisCmdError::Timeout(self.timeout),
            };
            if attempt >= self.retry.count || !err.is_retryable() {
                return Err(err);
            }
            attempt += 1;
            log_event!(debug, CATEGORY_STORAGE, "Retrying Redis command", attempt = attempt, error = %err);
            ctx.run(tokio::time::sleep(jittered(&self.retry))).await?;
        }
    }

    async fn query<T>(&self, ctx: &Context, cmd: &Cmd) -> Result<T, RedisCmdError>
    where
        T: FromRedisValue + Send,
    {
        self.execute(ctx, |mut conn| async move { cmd.query_async::<_, T>(&mut conn).await })
            .await
    }
}

#[async_trait]
impl<C> RedisCmd for RedisCmdImpl<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn ping(&self, ctx: &Context) -> Result<(), RedisCmdError> {
        let _: String = self.query(ctx, &redis::cmd("PING")).await?;
        Ok(())
    }

    async fn publish(&self, ctx: &Context, channel: &str, message: &str) -> Result<(), RedisCmdError> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);
        let _: i64 = self.query(ctx, &cmd).await?;
        Ok(())
    }

    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<String>, RedisCmdError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(ctx, &cmd).await
    }

    async fn mget(&self, ctx: &Context, keys: &[String]) -> Result<Vec<Option<String>>, RedisCmdError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        cmd.arg(keys);
        self.query(ctx, &cmd).await
    }

    async fn set_ex(&self, ctx: &Context, key: &str, value: &str, ttl_sec: u64) -> Result<(), RedisCmdError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl_sec);
        let _: String = self.query(ctx, &cmd).await?;
        Ok(())
    }

    async fn expire(&self, ctx: &Context, keys: &[String], ttl_sec: u64) -> Result<(), RedisCmdError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("EXPIRE").arg(key).arg(ttl_sec).ignore();
        }
        let pipe = &pipe;
        self.execute(ctx, |mut conn| async move { pipe.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn del(&self, ctx: &Context, key: &str) -> Result<(), RedisCmdError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: i64 = self.query(ctx, &cmd).await?;
        Ok(())
    }

    async fn load_script(&self, ctx: &Context, script: &RedisScript) -> Result<(), RedisCmdError> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(script.source);
        let hash: String = self.query(ctx, &cmd).await?;
        if hash != script.hash() {
            log_event!(warn, CATEGORY_STORAGE, "Redis returned unexpected script hash", script = script.name(), hash = %hash);
        }
        Ok(())
    }

    async fn run_script(
        &self,
        ctx: &Context,
        script: &RedisScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, RedisCmdError> {
        let script = &script.script;
        self.execute(ctx, |mut conn| async move {
            let mut invocation = script.prepare_invoke();
            for key in keys {
                invocation.key(key);
            }
            for arg in args {
                invocation.arg(arg);
            }
            // EVALSHA; on NOSCRIPT the invocation loads the source and retries.
            invocation.invoke_async::<_, Option<String>>(&mut conn).await
        })
        .await
    }

    async fn psubscribe(&self, ctx: &Context, pattern: &str) -> Result<BoxStream<'static, String>, RedisCmdError> {
        let connect = async {
            let mut pubsub = self.pubsub_client.get_async_pubsub().await?;
            pubsub.psubscribe(pattern).await?;
            Ok::<_, RedisError>(pubsub)
        };
        let pubsub = match ctx.run(tokio::time::timeout(self.timeout, connect)).await? {
            Ok(result) => result?,
            Err(_) => return Err(RedisCmdError::Timeout(self.timeout)),
        };
        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_channel_name().to_string())
            .boxed())
    }

    fn close(&self) {
        self.permits.close();
    }
}

fn connection_info(addr: &str, config: &RedisStorageConfig) -> Result<ConnectionInfo, StorageError> {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|e| StorageError::Configuration(format!("invalid Redis address \"{addr}\": {e}")))?;
            (host.to_string(), port)
        }
        None => (addr.to_string(), 6379),
    };
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db: config.db_number,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        },
    })
}

/// Connect according to `config` (single node or cluster).
pub(crate) async fn connect(ctx: &Context, config: &RedisStorageConfig) -> Result<Arc<dyn RedisCmd>, StorageError> {
    let connect_timeout = config.timeout.connect;
    let timed = |e: tokio::time::error::Elapsed| {
        StorageError::backend(
            format!("Unable to connect to Redis within {connect_timeout:?}"),
            e,
        )
    };
    let permits = Semaphore::new(config.connection.max.max(1));
    let timeout = config.timeout.read.max(config.timeout.write);

    if let Some(node) = config.single_node.as_deref().filter(|s| !s.is_empty()) {
        let client = redis::Client::open(connection_info(node, config)?)
            .map_err(|e| StorageError::backend("Invalid Redis configuration", e))?;
        let conn = ctx
            .run(tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone())))
            .await?
            .map_err(timed)?
            .map_err(|e| StorageError::backend(format!("Unable to connect to Redis ({node})"), e))?;
        return Ok(Arc::new(RedisCmdImpl {
            conn,
            pubsub_client: client,
            permits,
            timeout,
            retry: config.retry.clone(),
        }));
    }

    let nodes = config.cluster.as_deref().unwrap_or_default();
    let first = nodes
        .first()
        .ok_or_else(|| StorageError::Configuration("Redis cluster node list is empty".into()))?;
    let infos = nodes
        .iter()
        .map(|node| connection_info(node, config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = ClusterClient::builder(infos).retries(config.retry.count as u32);
    if let Some(username) = &config.username {
        builder = builder.username(username.clone());
    }
    if let Some(password) = &config.password {
        builder = builder.password(password.clone());
    }
    let cluster = builder
        .build()
        .map_err(|e| StorageError::backend("Invalid Redis cluster configuration", e))?;
    let conn: ClusterConnection = ctx
        .run(tokio::time::timeout(connect_timeout, cluster.get_async_connection()))
        .await?
        .map_err(timed)?
        .map_err(|e| StorageError::backend("Unable to connect to Redis cluster", e))?;
    // Cluster nodes forward PUBLISH to every node, so any one of them serves PSUBSCRIBE.
    let pubsub_client = redis::Client::open(connection_info(first, config)?)
        .map_err(|e| StorageError::backend("Invalid Redis configuration", e))?;
    Ok(Arc::new(RedisCmdImpl {
        conn,
        pubsub_client,
        permits,
        timeout,
        retry: config.retry.clone(),
    }))
}
