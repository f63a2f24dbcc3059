//! # Storage Conformance Suite
//!
//! Behaviour every storage must share, whatever the engine. Each check takes the
//! storage under test and a `prefix` that keeps its channel ids apart from other
//! runs against the same backend.
//!
//! Storages are built with [`stub_deps`](dsps_storage::testing::stub_deps), so the
//! channel named [`DISABLED_CHANNEL`] is rejected and every other id is accepted.

use dsps_storage::testing::DISABLED_CHANNEL;
use dsps_types::{
    AckHandle, ChannelId, Context, JwtExp, JwtJti, Message, MessageId, MessageLocator, Storage, SubscriberId,
    SubscriberLocator,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

pub mod multiplex;
pub mod onmemory;
pub mod redis;

/// Prefix unique to this process, for backends shared between runs.
pub fn unique_prefix(base: &str) -> String {
    format!("{base}-{}", chrono::Utc::now().timestamp_micros())
}

pub fn channel(prefix: &str, name: &str) -> ChannelId {
    ChannelId::new(format!("{prefix}-{name}")).unwrap()
}

pub fn subscriber(ch: &ChannelId, name: &str) -> SubscriberLocator {
    SubscriberLocator::new(ch.clone(), SubscriberId::new(name).unwrap())
}

pub fn locator(ch: &ChannelId, id: &str) -> MessageLocator {
    MessageLocator::new(ch.clone(), MessageId::new(id).unwrap())
}

pub fn message(ch: &ChannelId, id: &str, content: Value) -> Message {
    Message::new(locator(ch, id), content)
}

fn ids(msgs: &[Message]) -> Vec<String> {
    msgs.iter().map(|m| m.message_id().to_string()).collect()
}

/// Run every check that applies to the capabilities of `storage`.
pub async fn run_all(storage: &dyn Storage, prefix: &str) {
    probes(storage).await;
    if storage.as_pubsub().is_some() {
        publish_fetch_acknowledge(storage, prefix).await;
        more_messages(storage, prefix).await;
        is_old_messages(storage, prefix).await;
        idempotent_subscribers(storage, prefix).await;
        duplicate_publish_is_skipped(storage, prefix).await;
        foreign_ack_handle_is_malformed(storage, prefix).await;
        long_poll_wakes_on_publish(storage, prefix).await;
        missing_subscriber_and_channel(storage, prefix).await;
        canceled_fetch(storage, prefix).await;
    }
    if storage.as_jwt().is_some() {
        jwt_revocation(storage, prefix).await;
    }
}

pub async fn probes(storage: &dyn Storage) {
    let ctx = Context::background();
    storage.liveness(&ctx).await.unwrap();
    storage.readiness(&ctx).await.unwrap();
    let stat = storage.stat(&ctx).await.unwrap();
    assert!(stat.is_object(), "stat must be a JSON object: {stat}");
}

/// Subscribe, publish one message, fetch, acknowledge, fetch nothing.
pub async fn publish_fetch_acknowledge(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "basic");
    let s1 = subscriber(&ch, "s1");

    ps.new_subscriber(&ctx, &s1).await.unwrap();
    ps.publish_messages(&ctx, &[message(&ch, "m1", json!({"hi": "hello 0"}))])
        .await
        .unwrap();

    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert_eq!(fetched.messages, vec![message(&ch, "m1", json!({"hi": "hello 0"}))]);
    assert!(!fetched.more_messages);
    let handle = fetched.ack_handle.unwrap();
    assert_eq!(handle.locator, s1);

    ps.acknowledge_messages(&ctx, &handle).await.unwrap();
    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert!(fetched.messages.is_empty());
    assert!(fetched.ack_handle.is_none());

    // Acknowledging again is harmless.
    ps.acknowledge_messages(&ctx, &handle).await.unwrap();
}

/// `max` bounds the batch and `more_messages` tells whether anything was left.
pub async fn more_messages(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "more");
    let s1 = subscriber(&ch, "s1");
    ps.new_subscriber(&ctx, &s1).await.unwrap();

    let msgs: Vec<Message> = (0..16).map(|i| message(&ch, &format!("m{i}"), json!(i))).collect();
    ps.publish_messages(&ctx, &msgs).await.unwrap();

    let fetched = ps.fetch_messages(&ctx, &s1, 15, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), ids(&msgs[..15]));
    assert!(fetched.more_messages);

    let fetched = ps.fetch_messages(&ctx, &s1, 17, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), ids(&msgs));
    assert!(!fetched.more_messages);
}

pub async fn is_old_messages(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "old");
    let s1 = subscriber(&ch, "s1");

    ps.publish_messages(&ctx, &[message(&ch, "m1", json!(1))]).await.unwrap();
    ps.new_subscriber(&ctx, &s1).await.unwrap();
    ps.publish_messages(&ctx, &[message(&ch, "m2", json!(2))]).await.unwrap();
    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), vec!["m2"]);
    ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
        .await
        .unwrap();
    ps.publish_messages(&ctx, &[message(&ch, "m3", json!(3))]).await.unwrap();
    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), vec!["m3"]);

    let locs: Vec<MessageLocator> = ["m0", "m1", "m2", "m3", "m4"].iter().map(|id| locator(&ch, id)).collect();
    let old = ps.is_old_messages(&ctx, &s1, &locs).await.unwrap();
    let expected = [("m0", false), ("m1", true), ("m2", true), ("m3", false), ("m4", false)];
    for (id, want) in expected {
        assert_eq!(old[&locator(&ch, id)], want, "IsOldMessages of {id}");
    }
}

pub async fn idempotent_subscribers(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "idem");
    let s1 = subscriber(&ch, "s1");

    ps.new_subscriber(&ctx, &s1).await.unwrap();
    ps.publish_messages(&ctx, &[message(&ch, "m1", json!(1))]).await.unwrap();
    // Re-creating keeps the cursor, so m1 is still pending.
    ps.new_subscriber(&ctx, &s1).await.unwrap();
    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), vec!["m1"]);

    ps.remove_subscriber(&ctx, &s1).await.unwrap();
    ps.remove_subscriber(&ctx, &s1).await.unwrap();
    let err = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap_err();
    assert!(err.is_subscription_not_found(), "{err}");
}

pub async fn duplicate_publish_is_skipped(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "dup");
    let s1 = subscriber(&ch, "s1");
    ps.new_subscriber(&ctx, &s1).await.unwrap();

    ps.publish_messages(&ctx, &[message(&ch, "m1", json!("first"))]).await.unwrap();
    ps.publish_messages(
        &ctx,
        &[message(&ch, "m1", json!("second")), message(&ch, "m2", json!("other"))],
    )
    .await
    .unwrap();

    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    assert_eq!(
        fetched.messages,
        vec![message(&ch, "m1", json!("first")), message(&ch, "m2", json!("other"))]
    );
}

/// A handle only acknowledges for the subscriber it was issued to.
pub async fn foreign_ack_handle_is_malformed(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "foreign");
    let (s1, s2) = (subscriber(&ch, "s1"), subscriber(&ch, "s2"));
    ps.new_subscriber(&ctx, &s1).await.unwrap();
    ps.new_subscriber(&ctx, &s2).await.unwrap();
    ps.publish_messages(&ctx, &[message(&ch, "m1", json!(1))]).await.unwrap();

    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
    let stolen = AckHandle::new(s2.clone(), fetched.ack_handle.unwrap().handle);
    let err = ps.acknowledge_messages(&ctx, &stolen).await.unwrap_err();
    assert!(err.is_malformed_ack_handle(), "{err}");

    let fetched = ps.fetch_messages(&ctx, &s2, 10, Duration::ZERO).await.unwrap();
    assert_eq!(ids(&fetched.messages), vec!["m1"]);
}

pub async fn long_poll_wakes_on_publish(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "poll");
    let s1 = subscriber(&ch, "s1");
    ps.new_subscriber(&ctx, &s1).await.unwrap();

    let started = Instant::now();
    let (fetched, published) = tokio::join!(ps.fetch_messages(&ctx, &s1, 10, Duration::from_secs(10)), async {
        sleep(Duration::from_millis(200)).await;
        ps.publish_messages(&ctx, &[message(&ch, "m1", json!(1))]).await
    });
    published.unwrap();
    assert_eq!(ids(&fetched.unwrap().messages), vec!["m1"]);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Nothing arrives: the poll ends empty once `wait` elapsed.
    let ch = channel(prefix, "poll-empty");
    let s1 = subscriber(&ch, "s1");
    ps.new_subscriber(&ctx, &s1).await.unwrap();
    let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::from_millis(300)).await.unwrap();
    assert!(fetched.messages.is_empty());
}

pub async fn missing_subscriber_and_channel(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ctx = Context::background();
    let ch = channel(prefix, "missing");

    let err = ps
        .fetch_messages(&ctx, &subscriber(&ch, "nobody"), 10, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_subscription_not_found(), "{err}");
    assert!(err.is_non_fatal());

    let disabled = ChannelId::new(DISABLED_CHANNEL).unwrap();
    let err = ps.new_subscriber(&ctx, &subscriber(&disabled, "s1")).await.unwrap_err();
    assert!(err.is_invalid_channel(), "{err}");
    let err = ps
        .publish_messages(&ctx, &[message(&disabled, "m1", json!(1))])
        .await
        .unwrap_err();
    assert!(err.is_invalid_channel(), "{err}");
}

pub async fn canceled_fetch(storage: &dyn Storage, prefix: &str) {
    let ps = storage.as_pubsub().unwrap();
    let ch = channel(prefix, "cancel");
    let s1 = subscriber(&ch, "s1");
    ps.new_subscriber(&Context::background(), &s1).await.unwrap();

    let ctx = Context::background().with_timeout(Duration::from_millis(200));
    let result = timeout(Duration::from_secs(5), ps.fetch_messages(&ctx, &s1, 10, Duration::from_secs(30)))
        .await
        .expect("fetch must give up when its context ends");
    let err = result.unwrap_err();
    assert!(err.is_canceled(), "{err}");
}

pub async fn jwt_revocation(storage: &dyn Storage, prefix: &str) {
    let jwt = storage.as_jwt().unwrap();
    let ctx = Context::background();
    let jti = JwtJti::new(format!("{prefix}-jti"));
    let exp = JwtExp::from_epoch_seconds(chrono::Utc::now().timestamp() + 600);

    assert!(!jwt.is_revoked_jwt(&ctx, &jti).await.unwrap());
    jwt.revoke_jwt(&ctx, exp, &jti).await.unwrap();
    assert!(jwt.is_revoked_jwt(&ctx, &jti).await.unwrap());
    assert!(!jwt
        .is_revoked_jwt(&ctx, &JwtJti::new(format!("{prefix}-other")))
        .await
        .unwrap());

    // Already expired tokens need no revocation entry.
    let expired = JwtJti::new(format!("{prefix}-expired"));
    jwt.revoke_jwt(&ctx, JwtExp::from_epoch_seconds(chrono::Utc::now().timestamp() - 10), &expired)
        .await
        .unwrap();
    assert!(!jwt.is_revoked_jwt(&ctx, &expired).await.unwrap());
}
