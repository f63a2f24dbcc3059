//! Storage that replicates every operation onto several child storages.
//!
//! Each operation fans out to all children concurrently and succeeds when at least
//! one child succeeds, so a single backend outage does not interrupt the service.
//! Fetch results are merged: messages are deduplicated by locator, and messages that
//! only some children returned are checked with `IsOldMessages` so that a message
//! already acknowledged on one backend is not redelivered by a lagging one.

mod ack_handle;
mod jwt;
mod parallel;
mod probe;
mod pubsub;

use async_trait::async_trait;
use dsps_types::{Context, JwtStorage, PubSubStorage, Storage, StorageError, StorageId};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use probe::Probe;

/// Once a child returned messages, slower children get this long before their
/// long-poll is canceled.
pub(crate) const PARALLEL_FETCH_EARLY_RETURN_WINDOW: Duration = Duration::from_millis(300);

#[derive(Default)]
struct Counters {
    early_returns: AtomicU64,
    recovered_subscribers: AtomicU64,
    stale_messages_filtered: AtomicU64,
}

/// Multiplexer's own section of `Stat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexStat {
    pub children: usize,
    pub early_returns: u64,
    pub recovered_subscribers: u64,
    pub stale_messages_filtered: u64,
}

pub struct StorageMultiplexer {
    children: BTreeMap<StorageId, Arc<dyn Storage>>,
    pubsub_supported: bool,
    jwt_supported: bool,
    counters: Counters,
}

impl StorageMultiplexer {
    pub fn new(children: BTreeMap<StorageId, Arc<dyn Storage>>) -> Result<Self, StorageError> {
        if children.is_empty() {
            return Err(StorageError::Configuration("List of storages must not be empty".into()));
        }
        let pubsub_supported = children.values().any(|c| c.as_pubsub().is_some());
        let jwt_supported = children.values().any(|c| c.as_jwt().is_some());
        Ok(Self {
            children,
            pubsub_supported,
            jwt_supported,
            counters: Counters::default(),
        })
    }

    pub fn children(&self) -> &BTreeMap<StorageId, Arc<dyn Storage>> {
        &self.children
    }

    pub fn multiplex_stat(&self) -> MultiplexStat {
        MultiplexStat {
            children: self.children.len(),
            early_returns: self.counters.early_returns.load(Ordering::Relaxed),
            recovered_subscribers: self.counters.recovered_subscribers.load(Ordering::Relaxed),
            stale_messages_filtered: self.counters.stale_messages_filtered.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StorageMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.children.values().map(ToString::to_string).collect();
        f.write_str(&names.join(","))
    }
}

#[async_trait]
impl Storage for StorageMultiplexer {
    async fn shutdown(&self, ctx: &Context) -> Result<(), StorageError> {
        let results = join_all(self.children.iter().map(|(id, child)| async move {
            child.shutdown(ctx).await.map_err(|e| StorageError::Child {
                operation: "Shutdown",
                storage_id: id.to_string(),
                source: Box::new(e),
            })
        }))
        .await;
        results.into_iter().collect()
    }

    async fn liveness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.probe(ctx, Probe::Liveness).await
    }

    async fn readiness(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.probe(ctx, Probe::Readiness).await
    }

    async fn stat(&self, ctx: &Context) -> Result<serde_json::Value, StorageError> {
        self.collect_stat(ctx).await
    }

    fn as_pubsub(&self) -> Option<&dyn PubSubStorage> {
        if self.pubsub_supported {
            Some(self)
        } else {
            None
        }
    }

    fn as_jwt(&self) -> Option<&dyn JwtStorage> {
        if self.jwt_supported {
            Some(self)
        } else {
            None
        }
    }

    fn no_file_pressure(&self) -> usize {
        self.children.values().map(|c| c.no_file_pressure()).sum()
    }
}
