//! Context-aware mutex.

use dsps_types::{Context, LockCanceled};
use tokio::sync::{Mutex, MutexGuard};

/// Held lock. Dropping the guard unlocks; it can only be released once.
pub type ContextLockGuard<'a, T> = MutexGuard<'a, T>;

/// Mutex whose acquisition is abandoned when the caller's context ends.
#[derive(Debug, Default)]
pub struct ContextLock<T> {
    inner: Mutex<T>,
}

impl<T> ContextLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Wait for the lock or for `ctx` to end, whichever comes first.
    pub async fn lock(&self, ctx: &Context) -> Result<ContextLockGuard<'_, T>, LockCanceled> {
        ctx.run(self.inner.lock())
            .await
            .map_err(|cause| LockCanceled { cause })
    }

    /// Take the lock without a context; used where no caller is waiting (shutdown paths).
    pub async fn lock_uncancelable(&self) -> ContextLockGuard<'_, T> {
        self.inner.lock().await
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
