//! Conformance of the Redis engine.
//!
//! Runs only when `DSPS_TEST_REDIS_SINGLE_NODE` names a disposable Redis
//! (e.g. `localhost:6379`).

use dsps_storage::testing::stub_deps;
use dsps_storage::{RedisStorage, RedisStorageConfig};
use dsps_types::{Context, StubSystemClock};

pub const REDIS_ENV: &str = "DSPS_TEST_REDIS_SINGLE_NODE";

/// Address of the test Redis, `None` when Redis tests are disabled.
pub fn redis_address() -> Option<String> {
    std::env::var(REDIS_ENV).ok().filter(|addr| !addr.is_empty())
}

pub fn redis_config(addr: &str) -> RedisStorageConfig {
    let mut config = RedisStorageConfig {
        single_node: Some(addr.to_string()),
        ..Default::default()
    };
    config.connection.max = 16;
    config.connection.min = 1;
    config
}

pub async fn connect(config: &RedisStorageConfig) -> anyhow::Result<RedisStorage> {
    let mut config = config.clone();
    config.postprocess()?;
    let storage = RedisStorage::new(&Context::background(), &config, &stub_deps(StubSystemClock::default())).await?;
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::super::{run_all, unique_prefix};
    use super::*;
    use dsps_types::Storage;

    #[tokio::test]
    async fn test_redis_conformance() {
        let Some(addr) = redis_address() else {
            return;
        };
        let storage = connect(&redis_config(&addr)).await.unwrap();
        run_all(&storage, &unique_prefix("redis")).await;
        storage.shutdown(&Context::background()).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_without_pubsub_conformance() {
        let Some(addr) = redis_address() else {
            return;
        };
        let mut config = redis_config(&addr);
        config.disable_pub_sub = true;
        let storage = connect(&config).await.unwrap();
        assert!(storage.as_pubsub().is_none());
        run_all(&storage, &unique_prefix("redis-nops")).await;
        storage.shutdown(&Context::background()).await.unwrap();
    }
}
