//! Conformance of storages built by the factory: the `#root` tracing wrapper over
//! the multiplexer over traced children.

#[cfg(test)]
mod tests {
    use super::super::run_all;
    use dsps_storage::testing::stub_deps;
    use dsps_storage::{new_storage, OnmemoryStorageConfig, StorageConfig, StoragesConfig};
    use dsps_types::{Context, StorageId, StubSystemClock};

    fn onmemory_children(ids: &[&str]) -> StoragesConfig {
        ids.iter()
            .map(|id| {
                let config = StorageConfig {
                    onmemory: Some(OnmemoryStorageConfig::default()),
                    redis: None,
                };
                (StorageId::new(*id), config)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_child_conformance() {
        let ctx = Context::background();
        let storage = new_storage(&ctx, &onmemory_children(&["default"]), &stub_deps(StubSystemClock::default()))
            .await
            .unwrap();
        run_all(storage.as_ref(), "mux1").await;
        storage.shutdown(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_three_children_conformance() {
        let ctx = Context::background();
        let storage = new_storage(
            &ctx,
            &onmemory_children(&["s1", "s2", "s3"]),
            &stub_deps(StubSystemClock::default()),
        )
        .await
        .unwrap();
        run_all(storage.as_ref(), "mux3").await;

        let stat = storage.stat(&ctx).await.unwrap();
        assert_eq!(stat["storage"]["multiplex"]["children"], 3);
        assert_eq!(stat["storage"]["multiplex"]["staleMessagesFiltered"], 0);
        storage.shutdown(&ctx).await.unwrap();
    }
}
