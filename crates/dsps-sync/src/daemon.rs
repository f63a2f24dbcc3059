//! Periodic background tasks.
//!
//! A [`Daemon`] repeatedly invokes its function, sleeping for the interval the
//! function asks for. Every cycle runs inside a fresh daemon span. Panics are
//! caught and turned into errors retried after a short delay.

use dsps_telemetry::{log_event, Sentry, SpanKind, Telemetry, CATEGORY_DAEMON};
use dsps_types::{BoxError, CancelCause, Context, LockCanceled, StorageError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

/// Delay before retrying a cycle that panicked.
const PANIC_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SyncError {
    /// Daemon names are unique within a system.
    #[error("daemon \"{name}\" already exists on system \"{system}\"")]
    DaemonExists { system: String, name: String },

    /// The daemon has been shut down.
    #[error("dsps.daemon.closed")]
    DaemonClosed,

    #[error(transparent)]
    Canceled(#[from] CancelCause),
}

/// What a daemon does after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonNextRun {
    pub interval: Duration,
    /// `true` stops the daemon.
    pub abort: bool,
}

impl DaemonNextRun {
    #[must_use]
    pub fn after(interval: Duration) -> Self {
        Self {
            interval,
            abort: false,
        }
    }

    #[must_use]
    pub fn abort() -> Self {
        Self {
            interval: Duration::ZERO,
            abort: true,
        }
    }

    /// Fail this cycle but still schedule the next one as requested.
    pub fn fail(self, source: impl Into<BoxError>) -> DaemonError {
        DaemonError {
            next_run: self,
            source: source.into(),
        }
    }
}

/// Failed cycle. Carries the schedule of the next cycle.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct DaemonError {
    pub next_run: DaemonNextRun,
    #[source]
    pub source: BoxError,
}

impl DaemonError {
    fn is_canceled(&self) -> bool {
        let err: &(dyn std::error::Error + 'static) = self.source.as_ref();
        if err.downcast_ref::<CancelCause>().is_some() || err.downcast_ref::<LockCanceled>().is_some() {
            return true;
        }
        err.downcast_ref::<StorageError>()
            .map(StorageError::is_canceled)
            .unwrap_or(false)
    }
}

pub type DaemonFuture = BoxFuture<'static, Result<DaemonNextRun, DaemonError>>;

type DaemonFn = Arc<dyn Fn(Context) -> DaemonFuture + Send + Sync>;

/// Receives every non-cancellation error of the system's daemons.
pub type DaemonErrorHandler = Arc<dyn Fn(&str, &DaemonError) + Send + Sync>;

#[derive(Clone)]
pub struct DaemonSystemDeps {
    pub telemetry: Telemetry,
    pub sentry: Arc<dyn Sentry>,
}

/// Controller of a set of named daemons.
pub struct DaemonSystem {
    name: String,
    deps: DaemonSystemDeps,
    error_handler: DaemonErrorHandler,
    daemons: Mutex<HashMap<String, Arc<Daemon>>>,
}

impl fmt::Display for DaemonSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DaemonSystem({})", self.name)
    }
}

impl DaemonSystem {
    pub fn new(name: impl Into<String>, deps: DaemonSystemDeps, error_handler: DaemonErrorHandler) -> Self {
        Self {
            name: name.into(),
            deps,
            error_handler,
            daemons: Mutex::new(HashMap::with_capacity(16)),
        }
    }

    /// System whose error handler only logs.
    pub fn with_logging_handler(name: impl Into<String>, deps: DaemonSystemDeps) -> Self {
        let name = name.into();
        let system = name.clone();
        Self::new(
            name,
            deps,
            Arc::new(move |daemon: &str, err: &DaemonError| {
                log_event!(error, CATEGORY_DAEMON, "daemon failed", system = %system, daemon = %daemon, error = %err);
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn a daemon. Must be called inside a Tokio runtime.
    pub fn start<F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Daemon>, SyncError>
    where
        F: Fn(Context) -> DaemonFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let daemon = {
            let mut daemons = self.daemons.lock();
            if daemons.contains_key(&name) {
                return Err(SyncError::DaemonExists {
                    system: self.name.clone(),
                    name,
                });
            }
            let daemon = Arc::new(Daemon::new(name.clone()));
            daemons.insert(name, daemon.clone());
            daemon
        };

        let runner = DaemonRunner {
            system: self.name.clone(),
            deps: self.deps.clone(),
            error_handler: self.error_handler.clone(),
            daemon: daemon.clone(),
            f: Arc::new(f),
        };
        tokio::spawn(runner.run());
        Ok(daemon)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Daemon>> {
        self.daemons.lock().get(name).cloned()
    }

    /// Request shutdown of every daemon and wait until all of them end.
    pub async fn shutdown(&self, ctx: &Context) -> Result<(), SyncError> {
        let daemons: Vec<Arc<Daemon>> = self.daemons.lock().values().cloned().collect();
        for d in &daemons {
            d.request_shutdown();
        }
        futures::future::try_join_all(daemons.iter().map(|d| d.wait_until_shutdown(ctx))).await?;
        Ok(())
    }
}

/// Handle of a running daemon.
pub struct Daemon {
    name: String,
    shutdown: Context,
    completed: watch::Sender<bool>,
    cycles: watch::Sender<u64>,
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.name)
            .field("cycles", &*self.cycles.borrow())
            .field("completed", &*self.completed.borrow())
            .finish()
    }
}

impl fmt::Display for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Daemon({})", self.name)
    }
}

impl Daemon {
    fn new(name: String) -> Self {
        Self {
            name,
            shutdown: Context::background(),
            completed: watch::channel(false).0,
            cycles: watch::channel(0).0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a cycle completes after this call.
    ///
    /// `before_wait` runs after the current cycle count is captured, so a cycle
    /// triggered by it cannot be missed.
    pub async fn wait_next_cycle(&self, ctx: &Context, before_wait: impl FnOnce()) -> Result<(), SyncError> {
        let mut cycles = self.cycles.subscribe();
        cycles.borrow_and_update();
        before_wait();

        tokio::select! {
            cause = ctx.done() => Err(cause.into()),
            _ = self.shutdown.done() => Err(SyncError::DaemonClosed),
            changed = cycles.changed() => changed.map_err(|_| SyncError::DaemonClosed),
        }
    }

    /// Ask the daemon to stop without waiting for it.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the daemon's loop has ended.
    pub async fn wait_until_shutdown(&self, ctx: &Context) -> Result<(), SyncError> {
        let mut completed = self.completed.subscribe();
        let outcome = match ctx.run(completed.wait_for(|done| *done)).await {
            Ok(_) => Ok(()),
            Err(cause) => Err(cause.into()),
        };
        outcome
    }

    pub fn is_shutdown(&self) -> bool {
        *self.completed.borrow()
    }
}

struct DaemonRunner {
    system: String,
    deps: DaemonSystemDeps,
    error_handler: DaemonErrorHandler,
    daemon: Arc<Daemon>,
    f: DaemonFn,
}

impl DaemonRunner {
    async fn run(self) {
        let mut interval = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = self.daemon.shutdown.done() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let next = self.cycle().await;
            self.daemon.cycles.send_modify(|n| *n = n.wrapping_add(1));
            if next.abort {
                break;
            }
            interval = next.interval;
        }
        self.daemon.shutdown.cancel();
        self.daemon.completed.send_replace(true);
    }

    async fn cycle(&self) -> DaemonNextRun {
        let mut span = self.deps.telemetry.start_daemon_span(&self.system, &self.daemon.name);
        let ctx = self.daemon.shutdown.with_cancel();
        let fut = (self.f)(ctx).instrument(span.span().clone());

        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(DaemonNextRun::after(PANIC_RETRY_INTERVAL)
                    .fail(format!("panic in background job: {message}")))
            }
        };

        match result {
            Ok(next) => next,
            Err(err) => {
                if !err.is_canceled() {
                    span.record_error(&err);
                    self.deps.sentry.record_error(&err);
                    self.deps.telemetry.record_error(SpanKind::Daemon, &err);
                    (self.error_handler)(&self.daemon.name, &err);
                }
                err.next_run
            }
        }
    }
}
