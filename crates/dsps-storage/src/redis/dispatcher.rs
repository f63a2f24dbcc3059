//! PSUBSCRIBE fan-out that wakes long-polling fetches.
//!
//! One durable `PSUBSCRIBE dsps.c.*` connection feeds a worker task. Fetches register
//! an [`Awaiter`] for the Redis channel of their DSPS channel; a PUBLISH on that
//! channel resolves (and removes) every awaiter registered for it. A reconcile daemon
//! checks the subscription every minute by publishing a heartbeat and waiting for it
//! to come back through the stream. When it does not, the subscription is
//! re-established and the outstanding awaiters are rejected because notifications
//! may have been lost.

use dsps_sync::{DaemonError, DaemonNextRun, DaemonSystem, SyncError};
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{CancelCause, Context};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::connection::RedisCmd;
use super::keys::{PUBSUB_HEARTBEAT_CHANNEL, PUBSUB_PATTERN};

pub(crate) const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
pub(crate) const RECONCILE_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// How long a heartbeat may take to travel PUBLISH -> PSUBSCRIBE stream.
pub(crate) const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub(crate) enum DispatcherError {
    #[error("Redis PSUBSCRIBE stream closed due to storage shutdown: {0}")]
    Closed(CancelCause),

    #[error("Redis PSUBSCRIBE connection down (may overlooked Redis PUBLISH message lost), subscription interrupted: {0}")]
    Interrupted(String),
}

type AwaiterResult = Result<(), DispatcherError>;

#[derive(Default)]
struct Awaiters {
    closed: bool,
    next_id: u64,
    by_channel: HashMap<String, HashMap<u64, oneshot::Sender<AwaiterResult>>>,
}

#[derive(Default)]
struct Shared {
    awaiters: Mutex<Awaiters>,
}

impl Shared {
    fn register(self: &Arc<Self>, channel: &str) -> Awaiter {
        let (tx, rx) = oneshot::channel();
        let mut awaiters = self.awaiters.lock();
        if awaiters.closed {
            let _ = tx.send(Err(DispatcherError::Closed(CancelCause::Canceled)));
            return Awaiter {
                shared: Arc::clone(self),
                registration: None,
                rx,
            };
        }
        awaiters.next_id += 1;
        let id = awaiters.next_id;
        awaiters.by_channel.entry(channel.to_string()).or_default().insert(id, tx);
        Awaiter {
            shared: Arc::clone(self),
            registration: Some((channel.to_string(), id)),
            rx,
        }
    }

    fn resolve(&self, channel: &str) {
        let resolved = self.awaiters.lock().by_channel.remove(channel);
        for tx in resolved.into_iter().flat_map(HashMap::into_values) {
            let _ = tx.send(Ok(()));
        }
    }

    fn reject_all(&self, err: &DispatcherError) {
        let rejected = std::mem::take(&mut self.awaiters.lock().by_channel);
        for tx in rejected.into_values().flat_map(HashMap::into_values) {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn forget(&self, channel: &str, id: u64) {
        let mut awaiters = self.awaiters.lock();
        if let Some(waiting) = awaiters.by_channel.get_mut(channel) {
            waiting.remove(&id);
            if waiting.is_empty() {
                awaiters.by_channel.remove(channel);
            }
        }
    }

    fn count(&self) -> usize {
        self.awaiters.lock().by_channel.values().map(HashMap::len).sum()
    }
}

/// One-shot wake-up for a Redis channel. Dropping it unregisters it.
pub(crate) struct Awaiter {
    shared: Arc<Shared>,
    registration: Option<(String, u64)>,
    rx: oneshot::Receiver<AwaiterResult>,
}

impl Awaiter {
    pub(crate) async fn wait(&mut self) -> AwaiterResult {
        let result = match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(DispatcherError::Closed(CancelCause::Canceled)),
        };
        // Resolution already removed the registration.
        self.registration = None;
        result
    }
}

impl Drop for Awaiter {
    fn drop(&mut self) {
        if let Some((channel, id)) = self.registration.take() {
            self.shared.forget(&channel, id);
        }
    }
}

struct Worker {
    task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

struct DispatcherInner {
    shared: Arc<Shared>,
    cmd: Arc<dyn RedisCmd>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DispatcherStat {
    pub(crate) subscribed: bool,
    pub(crate) awaiters: usize,
}

pub(crate) struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Start the reconcile daemon on `daemons`; its first cycle opens the subscription.
    pub(crate) fn start(daemons: &DaemonSystem, cmd: Arc<dyn RedisCmd>) -> Result<Self, SyncError> {
        let inner = Arc::new(DispatcherInner {
            shared: Arc::new(Shared::default()),
            cmd,
            worker: tokio::sync::Mutex::new(None),
        });
        let target = Arc::clone(&inner);
        daemons.start("pubsub-dispatcher", move |ctx| {
            let inner = Arc::clone(&target);
            async move {
                let interval = if inner.reconcile(&ctx).await {
                    RECONCILE_INTERVAL
                } else {
                    RECONCILE_RETRY_INTERVAL
                };
                Ok::<_, DaemonError>(DaemonNextRun::after(interval))
            }
            .boxed()
        })?;
        Ok(Self { inner })
    }

    /// Register interest in the next PUBLISH on `channel`.
    pub(crate) fn await_channel(&self, channel: &str) -> Awaiter {
        self.inner.shared.register(channel)
    }

    /// Ok while the subscription worker runs and a heartbeat makes the round trip.
    pub(crate) async fn check_availability(&self, ctx: &Context) -> Result<(), String> {
        self.inner.check_worker(ctx).await
    }

    pub(crate) async fn stat(&self) -> DispatcherStat {
        let subscribed = match &*self.inner.worker.lock().await {
            Some(worker) => worker.alive.load(Ordering::SeqCst),
            None => false,
        };
        DispatcherStat {
            subscribed,
            awaiters: self.inner.shared.count(),
        }
    }

    /// Reject every awaiter, refuse new ones and stop the worker.
    pub(crate) async fn close(&self) {
        self.inner.shared.awaiters.lock().closed = true;
        self.inner
            .shared
            .reject_all(&DispatcherError::Closed(CancelCause::Canceled));
        if let Some(worker) = self.inner.worker.lock().await.take() {
            worker.task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) async fn reconcile(&self, ctx: &Context) -> bool {
        self.inner.reconcile(ctx).await
    }
}

impl DispatcherInner {
    async fn check_worker(&self, ctx: &Context) -> Result<(), String> {
        match &*self.worker.lock().await {
            None => return Err("PSUBSCRIBE not established".into()),
            Some(worker) if !worker.alive.load(Ordering::SeqCst) => {
                return Err("PSUBSCRIBE stream closed".into());
            }
            Some(_) => {}
        }
        self.cmd.ping(ctx).await.map_err(|e| format!("PING failed: {e}"))?;
        self.heartbeat(ctx).await
    }

    /// PUBLISH on the heartbeat channel and wait for the stream to deliver it.
    /// A half-open subscription keeps its stream open but never delivers.
    async fn heartbeat(&self, ctx: &Context) -> Result<(), String> {
        let mut awaiter = self.shared.register(PUBSUB_HEARTBEAT_CHANNEL);
        self.cmd
            .publish(ctx, PUBSUB_HEARTBEAT_CHANNEL, "heartbeat")
            .await
            .map_err(|e| format!("heartbeat PUBLISH failed: {e}"))?;
        let delivered = ctx.run(tokio::time::timeout(HEARTBEAT_TIMEOUT, awaiter.wait())).await;
        match delivered {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("heartbeat not delivered: {e}")),
            Ok(Err(_)) => Err(format!(
                "PSUBSCRIBE heartbeat not delivered within {}s",
                HEARTBEAT_TIMEOUT.as_secs()
            )),
            Err(cause) => Err(format!("heartbeat canceled: {cause}")),
        }
    }

    /// Returns false when the subscription could not be (re)established.
    async fn reconcile(&self, ctx: &Context) -> bool {
        let reason = match self.check_worker(ctx).await {
            Ok(()) => return true,
            Err(reason) => reason,
        };
        if self.shared.awaiters.lock().closed {
            return true;
        }
        self.shared.reject_all(&DispatcherError::Interrupted(reason.clone()));

        match self.repair_worker(ctx).await {
            Ok(()) => {
                log_event!(info, CATEGORY_STORAGE, "Redis PSUBSCRIBE established", reason = %reason);
                true
            }
            Err(e) => {
                log_event!(warn, CATEGORY_STORAGE, "Failed to establish Redis PSUBSCRIBE", reason = %reason, error = %e);
                false
            }
        }
    }

    async fn repair_worker(&self, ctx: &Context) -> Result<(), super::connection::RedisCmdError> {
        let mut current = self.worker.lock().await;
        if let Some(old) = current.take() {
            old.task.abort();
        }

        let mut stream = self.cmd.psubscribe(ctx, PUBSUB_PATTERN).await?;
        let alive = Arc::new(AtomicBool::new(true));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&alive);
        let task = tokio::spawn(async move {
            while let Some(channel) = stream.next().await {
                shared.resolve(&channel);
            }
            flag.store(false, Ordering::SeqCst);
            log_event!(debug, CATEGORY_STORAGE, "Redis PSUBSCRIBE stream ended");
        });
        *current = Some(Worker { task, alive });
        Ok(())
    }
}
