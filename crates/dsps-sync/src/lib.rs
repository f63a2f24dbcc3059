//! # DSPS Sync
//!
//! Concurrency helpers shared by the storage engines.
//!
//! - [`ContextLock`]: a mutex whose acquisition gives up when the caller's
//!   [`Context`](dsps_types::Context) ends, returning [`LockCanceled`].
//! - [`DaemonSystem`] / [`Daemon`]: named periodic background tasks with per-cycle
//!   tracing, panic recovery and cooperative shutdown.
//!
//! ```text
//!   DaemonSystem("onmemory-storage")
//!     ├── Daemon("gc")         ──► cycle ─► sleep(interval) ─► cycle ─► ...
//!     └── Daemon("...")
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod daemon;
mod lock;

pub use daemon::{
    Daemon, DaemonError, DaemonErrorHandler, DaemonFuture, DaemonNextRun, DaemonSystem,
    DaemonSystemDeps, SyncError,
};
pub use dsps_types::LockCanceled;
pub use lock::{ContextLock, ContextLockGuard};
