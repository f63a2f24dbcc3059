//! Conformance of the on-memory engine.

#[cfg(test)]
mod tests {
    use super::super::run_all;
    use dsps_storage::testing::stub_deps;
    use dsps_storage::{OnmemoryStorage, OnmemoryStorageConfig};
    use dsps_types::{Context, Storage, StubSystemClock};

    fn new_storage(config: OnmemoryStorageConfig) -> OnmemoryStorage {
        OnmemoryStorage::new(&config, &stub_deps(StubSystemClock::default())).unwrap()
    }

    #[tokio::test]
    async fn test_onmemory_conformance() {
        let storage = new_storage(OnmemoryStorageConfig::default());
        run_all(&storage, "mem").await;
        storage.shutdown(&Context::background()).await.unwrap();
    }

    #[tokio::test]
    async fn test_onmemory_without_capabilities() {
        let storage = new_storage(OnmemoryStorageConfig {
            disable_pub_sub: true,
            disable_jwt: true,
            run_gc_on_shutdown: true,
        });
        assert!(storage.as_pubsub().is_none());
        assert!(storage.as_jwt().is_none());
        run_all(&storage, "mem-bare").await;
        storage.shutdown(&Context::background()).await.unwrap();
    }
}
