//! Channel cache with negative entries and amortized cleanup.

use chrono::{DateTime, Utc};
use dsps_types::clock::add_duration;
use dsps_types::{ChannelId, ChannelProvider, SharedChannel, StorageError, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long an unknown channel id keeps resolving to `InvalidChannel` without a lookup.
pub const NEGATIVE_CACHE_EXPIRE: Duration = Duration::from_secs(5 * 60);

/// Cleanup runs once the insertions since the last sweep exceed `len / factor`.
const CLEANUP_FACTOR: usize = 2;

struct Entry {
    expire_at: DateTime<Utc>,
    /// `None` is a negative entry.
    channel: Option<SharedChannel>,
}

impl Entry {
    fn extend(&mut self, clock: &dyn SystemClock) {
        let ttl = match &self.channel {
            Some(channel) => channel.expire(),
            None => NEGATIVE_CACHE_EXPIRE,
        };
        self.expire_at = add_duration(clock.now(), ttl);
    }
}

struct State {
    entries: HashMap<ChannelId, Entry>,
    age: usize,
}

pub struct CachedChannelProvider<P> {
    inner: P,
    clock: Arc<dyn SystemClock>,
    no_file_pressure: usize,
    state: Mutex<State>,
}

impl<P: ChannelProvider> CachedChannelProvider<P> {
    pub fn new(inner: P, clock: Arc<dyn SystemClock>) -> Self {
        let no_file_pressure = inner.no_file_pressure();
        Self {
            inner,
            clock,
            no_file_pressure,
            state: Mutex::new(State {
                entries: HashMap::with_capacity(1024),
                age: 0,
            }),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Number of cached entries, negative ones included.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cleanup(&self, state: &mut State) {
        if state.age <= state.entries.len() / CLEANUP_FACTOR {
            return;
        }
        let now = self.clock.now();
        state.entries.retain(|_, entry| entry.expire_at >= now);
        state.age = 0;
    }
}

impl<P: ChannelProvider> ChannelProvider for CachedChannelProvider<P> {
    fn get(&self, id: &ChannelId) -> Result<SharedChannel, StorageError> {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(id) {
            entry.extend(self.clock.as_ref());
            return entry
                .channel
                .clone()
                .ok_or_else(|| StorageError::InvalidChannel(id.to_string()));
        }

        self.cleanup(&mut state);
        state.age += 1;

        let channel = match self.inner.get(id) {
            Ok(channel) => Some(channel),
            Err(e) if e.is_invalid_channel() => None,
            Err(e) => {
                return Err(StorageError::ChannelConfiguration {
                    channel_id: id.to_string(),
                    source: Box::new(e),
                })
            }
        };
        let mut entry = Entry {
            expire_at: self.clock.now(),
            channel: channel.clone(),
        };
        entry.extend(self.clock.as_ref());
        state.entries.insert(id.clone(), entry);

        channel.ok_or_else(|| StorageError::InvalidChannel(id.to_string()))
    }

    fn no_file_pressure(&self) -> usize {
        self.no_file_pressure
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}
