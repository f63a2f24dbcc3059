//! Cancellation context passed into every storage operation.
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline. Child
//! contexts share cancellation with their parent and may only shorten the deadline.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelCause {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Lock acquisition aborted because the caller's context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lock canceled: {cause}")]
pub struct LockCanceled {
    #[source]
    pub cause: CancelCause,
}

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never canceled unless [`Context::cancel`] is called.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Child context canceled together with `self`, cancelable on its own.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < at => current,
            _ => at,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `Some(cause)` once the context has ended.
    pub fn err(&self) -> Option<CancelCause> {
        if self.token.is_cancelled() {
            return Some(CancelCause::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context ends.
    pub async fn done(&self) -> CancelCause {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CancelCause::Canceled,
                _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelCause::Canceled
            }
        }
    }

    /// Drive `fut` unless the context ends first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CancelCause>
    where
        F: Future<Output = T>,
    {
        if let Some(cause) = self.err() {
            return Err(cause);
        }
        tokio::select! {
            biased;
            cause = self.done() => Err(cause),
            value = fut => Ok(value),
        }
    }
}
