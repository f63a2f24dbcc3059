//! # DSPS Storage
//!
//! Storage engines behind the [`Storage`](dsps_types::Storage) capability traits.
//!
//! ## Engines
//!
//! - **On-memory** ([`OnmemoryStorage`]): single-process engine for development and tests.
//! - **Redis** ([`RedisStorage`]): single-node or cluster; per-channel operations run
//!   as Lua scripts, long-polling wakes up through a PSUBSCRIBE dispatcher.
//! - **Multiplexer** ([`StorageMultiplexer`]): replicates every operation onto several
//!   storages and tolerates the failure of all but one.
//! - **Tracing wrapper** ([`TracingStorage`]): one telemetry span per operation.
//!
//! [`new_storage`] assembles them from configuration:
//!
//! ```text
//!   TracingStorage("#root")
//!     └── StorageMultiplexer
//!           ├── TracingStorage("default") ──► OnmemoryStorage
//!           └── TracingStorage("cache")   ──► RedisStorage
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod checksum;
pub mod config;
mod deps;
mod factory;
mod multiplex;
mod onmemory;
mod redis;
pub mod testing;
mod tracing_wrapper;

pub use config::{
    default_storages_config, postprocess_storages_config, OnmemoryStorageConfig, RedisConnectionConfig,
    RedisRetryConfig, RedisStorageConfig, RedisTimeoutConfig, StorageConfig, StoragesConfig,
};
pub use deps::{StorageDeps, StorageDepsBuilder};
pub use factory::{new_storage, ROOT_STORAGE_ID};
pub use multiplex::{MultiplexStat, StorageMultiplexer};
pub use onmemory::{GcStat, OnmemoryStat, OnmemoryStorage};
pub use crate::redis::RedisStorage;
pub use tracing_wrapper::TracingStorage;
