//! Storage configuration with defaults and validation.

use dsps_types::config::{count_must_be_positive, duration_must_be_positive};
use dsps_types::duration::duration_serde;
use dsps_types::{ConfigError, StorageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Storage definitions keyed by storage id.
pub type StoragesConfig = BTreeMap<StorageId, StorageConfig>;

/// One storage. Exactly one engine section must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub onmemory: Option<OnmemoryStorageConfig>,
    pub redis: Option<RedisStorageConfig>,
}

pub fn default_storages_config() -> StoragesConfig {
    let mut config = StoragesConfig::new();
    config.insert(
        StorageId::new("default"),
        StorageConfig {
            onmemory: Some(OnmemoryStorageConfig::default()),
            redis: None,
        },
    );
    config
}

/// Apply defaults and validate every storage definition.
pub fn postprocess_storages_config(config: &mut StoragesConfig) -> Result<(), ConfigError> {
    if config.is_empty() {
        *config = default_storages_config();
        return Ok(());
    }
    for (id, storage) in config.iter_mut() {
        storage.postprocess().map_err(|e| e.at(format!("storage[{id}]")))?;
    }
    Ok(())
}

impl StorageConfig {
    pub fn postprocess(&mut self) -> Result<(), ConfigError> {
        match (&self.onmemory, &mut self.redis) {
            (None, None) => Err(ConfigError::Invalid("no storage type under the item".into())),
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "found multiple storage type under single item. To configure multiple storages, write separate storage definitions".into(),
            )),
            (None, Some(redis)) => redis.postprocess().map_err(|e| e.at("redis")),
            (Some(_), None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OnmemoryStorageConfig {
    #[serde(alias = "__disablePubSub")]
    pub disable_pub_sub: bool,
    #[serde(alias = "__disableJwt")]
    pub disable_jwt: bool,
    #[serde(alias = "__runGcOnShutdown")]
    pub run_gc_on_shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisStorageConfig {
    /// `host:port` of a standalone Redis.
    pub single_node: Option<String>,
    /// `host:port` of every known cluster node.
    pub cluster: Option<Vec<String>>,

    pub disable_pub_sub: bool,
    pub disable_jwt: bool,

    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "db")]
    pub db_number: i64,

    pub timeout: RedisTimeoutConfig,
    pub retry: RedisRetryConfig,
    pub connection: RedisConnectionConfig,
}

impl Default for RedisStorageConfig {
    fn default() -> Self {
        Self {
            single_node: None,
            cluster: None,
            disable_pub_sub: false,
            disable_jwt: false,
            username: None,
            password: None,
            db_number: 0,
            timeout: RedisTimeoutConfig::default(),
            retry: RedisRetryConfig::default(),
            connection: RedisConnectionConfig::default(),
        }
    }
}

impl RedisStorageConfig {
    pub fn is_single_node(&self) -> bool {
        self.single_node.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn is_cluster(&self) -> bool {
        self.cluster.as_ref().is_some_and(|nodes| !nodes.is_empty())
    }

    pub fn postprocess(&mut self) -> Result<(), ConfigError> {
        match (self.is_single_node(), self.is_cluster()) {
            (true, true) => {
                return Err(ConfigError::Invalid(
                    "Redis configuration can have ONLY ONE of 'singleNode' and 'cluster' item, cannot specify both".into(),
                ))
            }
            (false, false) => {
                return Err(ConfigError::Invalid(
                    "Redis configuration must have one of 'singleNode' and 'cluster' item".into(),
                ))
            }
            _ => {}
        }
        if self.db_number < 0 {
            return Err(ConfigError::Invalid("db must not be negative".into()));
        }
        duration_must_be_positive("timeout.connect", self.timeout.connect)?;
        duration_must_be_positive("timeout.read", self.timeout.read)?;
        duration_must_be_positive("timeout.write", self.timeout.write)?;
        count_must_be_positive("connection.max", self.connection.max)?;
        if self.connection.min > self.connection.max {
            self.connection.min = self.connection.max;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisTimeoutConfig {
    #[serde(with = "duration_serde")]
    pub connect: Duration,
    #[serde(with = "duration_serde")]
    pub read: Duration,
    #[serde(with = "duration_serde")]
    pub write: Duration,
}

impl Default for RedisTimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(5),
            write: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisRetryConfig {
    pub count: usize,
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    #[serde(with = "duration_serde")]
    pub interval_jitter: Duration,
}

impl Default for RedisRetryConfig {
    fn default() -> Self {
        Self {
            count: 3,
            interval: Duration::from_millis(500),
            interval_jitter: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisConnectionConfig {
    pub max: usize,
    pub min: usize,
    #[serde(with = "duration_serde")]
    pub max_idle_time: Duration,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            max: (cpus * 64).max(1024),
            min: cpus * 16,
            max_idle_time: Duration::from_secs(5 * 60),
        }
    }
}
