//! Wall clock abstraction so that expiry logic can be tested deterministically.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub trait SystemClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSystemClock;

impl SystemClock for RealSystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Clone)]
pub struct StubSystemClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for StubSystemClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl StubSystemClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }
}

impl SystemClock for StubSystemClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// `from + duration`, saturating instead of overflowing.
pub fn add_duration(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `from - duration`, saturating instead of overflowing.
pub fn sub_duration(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
