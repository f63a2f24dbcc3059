//! Messaging scenarios across storage engines.
//!
//! 1. Publish, fetch, acknowledge on a factory-built storage.
//! 2. Fetch batches bounded by `max`.
//! 3. `IsOldMessages` after interleaved publishes and acknowledgements.
//! 5. Multiplexer over three storages with one of them down.
//! 6. Redis channel clock wrapping from `MAX` to `MIN` (needs Redis).

#[cfg(test)]
mod tests {
    use crate::conformance::redis::{connect, redis_address, redis_config};
    use crate::conformance::{
        channel, is_old_messages, message, more_messages, publish_fetch_acknowledge, subscriber, unique_prefix,
    };
    use dsps_channel::{new_channel_provider, postprocess_channels_config, ChannelsConfig, ProviderDeps};
    use dsps_storage::testing::{stub_deps, FaultyStorage};
    use dsps_storage::{
        default_storages_config, new_storage, OnmemoryStorage, OnmemoryStorageConfig, StorageDeps, StorageMultiplexer,
    };
    use dsps_telemetry::{EmptySentry, Telemetry};
    use dsps_types::{Context, Storage, StorageId, StubSystemClock};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Largest channel clock; the next one wraps to its negation.
    const CLOCK_MAX: i64 = (1 << 53) - 1;

    async fn default_storage() -> Arc<dyn Storage> {
        new_storage(
            &Context::background(),
            &default_storages_config(),
            &stub_deps(StubSystemClock::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_publish_fetch_acknowledge() {
        let storage = default_storage().await;
        publish_fetch_acknowledge(storage.as_ref(), "scenario1").await;
    }

    #[tokio::test]
    async fn test_scenario_bounded_batches() {
        let storage = default_storage().await;
        more_messages(storage.as_ref(), "scenario2").await;
    }

    #[tokio::test]
    async fn test_scenario_is_old_messages() {
        let storage = default_storage().await;
        is_old_messages(storage.as_ref(), "scenario3").await;
    }

    #[tokio::test]
    async fn test_scenario_multiplexer_with_dead_child() {
        let deps = stub_deps(StubSystemClock::default());
        let mut faulty = Vec::new();
        let mut children: BTreeMap<StorageId, Arc<dyn Storage>> = BTreeMap::new();
        for i in 1..=3 {
            let inner = Arc::new(OnmemoryStorage::new(&OnmemoryStorageConfig::default(), &deps).unwrap());
            let child = Arc::new(FaultyStorage::new(inner));
            children.insert(StorageId::new(format!("storage{i}")), Arc::clone(&child) as Arc<dyn Storage>);
            faulty.push(child);
        }
        let mux = StorageMultiplexer::new(children).unwrap();
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let ch = channel("scenario5", "ch");
        let s1 = subscriber(&ch, "s1");

        ps.new_subscriber(&ctx, &s1).await.unwrap();
        ps.publish_messages(&ctx, &[message(&ch, "m1", json!({"hi": "hello"}))])
            .await
            .unwrap();
        faulty[1].kill();

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert_eq!(fetched.messages, vec![message(&ch, "m1", json!({"hi": "hello"}))]);
        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();

        // Readiness keeps answering; liveness reports the dead storage.
        let ready = mux.readiness(&ctx).await.unwrap();
        assert!(ready["children"]["storage2"]["error"].is_string());
        let err = mux.liveness(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("storage2"));
    }

    #[tokio::test]
    async fn test_scenario_channel_provider_drives_storage() {
        let clock = StubSystemClock::default();
        let mut channels: ChannelsConfig = serde_json::from_value(json!([
            {"regex": "chat-(?P<room>[0-9]+)", "expire": "10m"},
        ]))
        .unwrap();
        postprocess_channels_config(&mut channels).unwrap();
        let provider = new_channel_provider(
            &channels,
            ProviderDeps {
                clock: Arc::new(clock.clone()),
                telemetry: Telemetry::without_metrics(),
                sentry: Arc::new(EmptySentry),
            },
        )
        .unwrap();
        let deps = StorageDeps::builder()
            .clock(Arc::new(clock.clone()))
            .channel_provider(Arc::new(provider))
            .telemetry(Telemetry::without_metrics())
            .sentry(Arc::new(EmptySentry))
            .build()
            .unwrap();
        let storage = new_storage(&Context::background(), &default_storages_config(), &deps)
            .await
            .unwrap();
        let ps = storage.as_pubsub().unwrap();
        let ctx = Context::background();

        let room = channel("chat", "1234");
        ps.new_subscriber(&ctx, &subscriber(&room, "s1")).await.unwrap();
        ps.publish_messages(&ctx, &[message(&room, "m1", json!(1))]).await.unwrap();

        let lobby = channel("lobby", "1");
        let err = ps.new_subscriber(&ctx, &subscriber(&lobby, "s1")).await.unwrap_err();
        assert!(err.is_invalid_channel(), "{err}");

        let fetched = ps
            .fetch_messages(&ctx, &subscriber(&room, "s1"), 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(fetched.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_redis_clock_wraps() {
        let Some(addr) = redis_address() else {
            return;
        };
        let storage = connect(&redis_config(&addr)).await.unwrap();
        let ps = storage.as_pubsub().unwrap();
        let ctx = Context::background();
        let ch = channel(&unique_prefix("scenario6"), "ch");
        let s1 = subscriber(&ch, "s1");

        let client = redis::Client::open(format!("redis://{addr}")).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = redis::cmd("SET")
            .arg(format!("c.{{{ch}}}.clock"))
            .arg(CLOCK_MAX - 2)
            .query_async(&mut conn)
            .await
            .unwrap();

        ps.new_subscriber(&ctx, &s1).await.unwrap();
        ps.publish_messages(&ctx, &[message(&ch, "m1", json!(1)), message(&ch, "m2", json!(2))])
            .await
            .unwrap();
        ps.publish_messages(&ctx, &[message(&ch, "m3", json!(3))]).await.unwrap();

        let clock: i64 = redis::cmd("GET")
            .arg(format!("c.{{{ch}}}.clock"))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(clock, -CLOCK_MAX);

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        let ids: Vec<String> = fetched.messages.iter().map(|m| m.message_id().to_string()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();
        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert!(fetched.messages.is_empty());

        storage.shutdown(&ctx).await.unwrap();
    }
}
