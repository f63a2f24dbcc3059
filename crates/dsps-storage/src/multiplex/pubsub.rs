use async_trait::async_trait;
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{
    AckHandle, Context, FetchResult, Message, MessageLocator, PubSubStorage, StorageError, StorageId, SubscriberLocator,
};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::ack_handle::{decode_multiplex_ack_handle, encode_multiplex_ack_handle};
use super::{StorageMultiplexer, PARALLEL_FETCH_EARLY_RETURN_WINDOW};

/// Cancel `ctx` once `window` elapses.
fn cancel_after(ctx: &Context, window: Duration) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        ctx.cancel();
    });
}

impl StorageMultiplexer {
    /// Children that lost the subscriber (e.g. were down when it was created) get it
    /// back so that they receive future messages.
    async fn recover_subscribers(&self, ctx: &Context, sl: &SubscriberLocator, missing: Vec<StorageId>) {
        for id in missing {
            let Some(pubsub) = self.children.get(&id).and_then(|c| c.as_pubsub()) else {
                continue;
            };
            log_event!(debug, CATEGORY_STORAGE, "Auto-creating (recovering) subscriber missing on storage", storage = %id, subscriber = %sl);
            match pubsub.new_subscriber(ctx, sl).await {
                Ok(()) => {
                    self.counters.recovered_subscribers.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log_event!(warn, CATEGORY_STORAGE, "Failed to auto-create (recover) subscriber", storage = %id, subscriber = %sl, error = %e);
                }
            }
        }
    }
}

#[async_trait]
impl PubSubStorage for StorageMultiplexer {
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        self.parallel_at_least_one_success("NewSubscriber", |_, child| {
            let pubsub = child.as_pubsub()?;
            Some(async move { pubsub.new_subscriber(ctx, sl).await }.boxed())
        })
        .await
        .map(|_| ())
    }

    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        self.parallel_at_least_one_success("RemoveSubscriber", |_, child| {
            let pubsub = child.as_pubsub()?;
            Some(async move { pubsub.remove_subscriber(ctx, sl).await }.boxed())
        })
        .await
        .map(|_| ())
    }

    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError> {
        self.parallel_at_least_one_success("PublishMessages", |_, child| {
            let pubsub = child.as_pubsub()?;
            Some(async move { pubsub.publish_messages(ctx, msgs).await }.boxed())
        })
        .await
        .map(|_| ())
    }

    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError> {
        let parallel = ctx.with_cancel();
        let missing = Mutex::new(Vec::new());
        let results = self
            .parallel_at_least_one_success("FetchMessages", |id, child| {
                let pubsub = child.as_pubsub()?;
                let (parallel, missing) = (&parallel, &missing);
                Some(
                    async move {
                        match pubsub.fetch_messages(parallel, sl, max, wait).await {
                            Ok(result) => {
                                // Return promptly instead of waiting for slower long-polls.
                                if !result.messages.is_empty() && parallel.err().is_none() {
                                    cancel_after(parallel, PARALLEL_FETCH_EARLY_RETURN_WINDOW);
                                }
                                Ok(result)
                            }
                            Err(e) => {
                                if e.is_subscription_not_found() || e.is_invalid_channel() {
                                    missing.lock().push(id.clone());
                                }
                                Err(e)
                            }
                        }
                    }
                    .boxed(),
                )
            })
            .await;
        let canceled_children = parallel.err().is_some();
        parallel.cancel();
        let results = results?;
        if canceled_children {
            self.counters.early_returns.fetch_add(1, Ordering::Relaxed);
        }
        self.recover_subscribers(ctx, sl, missing.into_inner()).await;

        // Keeps the order each child returned; only concurrent publish retries can
        // make children disagree on ordering.
        let mut redundancy: HashMap<MessageLocator, usize> = HashMap::new();
        let mut merged: Vec<Message> = Vec::with_capacity(max);
        let mut ack_handles = BTreeMap::new();
        let mut more_messages = false;
        for (id, result) in results.iter() {
            more_messages |= result.more_messages;
            for msg in &result.messages {
                let count = redundancy.entry(msg.locator.clone()).or_default();
                *count += 1;
                if *count == 1 {
                    merged.push(msg.clone());
                }
            }
            if let (false, Some(handle)) = (result.messages.is_empty(), &result.ack_handle) {
                ack_handles.insert(id.clone(), handle.clone());
            }
        }

        // Messages missing on some child may be acknowledged there already.
        let suspects: Vec<MessageLocator> = merged
            .iter()
            .filter(|m| redundancy.get(&m.locator).copied() != Some(results.len()))
            .map(|m| m.locator.clone())
            .collect();
        let stale = self.is_old_messages(ctx, sl, &suspects).await?;
        let before = merged.len();
        merged.retain(|m| !stale.get(&m.locator).copied().unwrap_or(false));
        self.counters
            .stale_messages_filtered
            .fetch_add((before - merged.len()) as u64, Ordering::Relaxed);

        if ack_handles.is_empty() {
            return Ok(FetchResult {
                more_messages,
                ..FetchResult::empty()
            });
        }
        let ack_handle = encode_multiplex_ack_handle(&ack_handles)?;
        if merged.is_empty() {
            // Only stale messages: move the lagging children past them.
            if let Err(e) = self.acknowledge_messages(ctx, &ack_handle).await {
                log_event!(warn, CATEGORY_STORAGE, "Failed to acknowledge stale messages", subscriber = %sl, error = %e);
            }
            return Ok(FetchResult {
                more_messages,
                ..FetchResult::empty()
            });
        }
        Ok(FetchResult {
            messages: merged,
            more_messages,
            ack_handle: Some(ack_handle),
        })
    }

    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError> {
        let handles = decode_multiplex_ack_handle(handle)?;
        self.parallel_at_least_one_success("AcknowledgeMessages", |id, child| {
            let pubsub = child.as_pubsub()?;
            // Storages added after the handle was issued have nothing to acknowledge.
            let handle = handles.get(id)?;
            Some(async move { pubsub.acknowledge_messages(ctx, handle).await }.boxed())
        })
        .await
        .map(|_| ())
    }

    /// Never fails: a child error only means that child cannot vote "old".
    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError> {
        let mut result: HashMap<MessageLocator, bool> = msgs.iter().map(|m| (m.clone(), false)).collect();
        if msgs.is_empty() {
            return Ok(result);
        }

        let votes = join_all(self.children.iter().filter_map(|(id, child)| {
            let pubsub = child.as_pubsub()?;
            Some(async move { (id, pubsub.is_old_messages(ctx, sl, msgs).await) })
        }))
        .await;
        for (id, vote) in votes {
            match vote {
                Ok(old) => {
                    for (loc, is_old) in old {
                        if is_old {
                            result.insert(loc, true);
                        }
                    }
                }
                Err(e) if e.is_non_fatal() => {
                    log_event!(debug, CATEGORY_STORAGE, "IsOldMessages failed", storage = %id, error = %e);
                }
                Err(e) => {
                    log_event!(warn, CATEGORY_STORAGE, "IsOldMessages failed", storage = %id, error = %e);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{faulty_children, multiplexer_of};
    use dsps_types::{
        ChannelId, Context, Message, MessageId, MessageLocator, Storage, SubscriberId, SubscriberLocator,
    };
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn sl(ch: &str, sbsc: &str) -> SubscriberLocator {
        SubscriberLocator::new(ChannelId::new(ch).unwrap(), SubscriberId::new(sbsc).unwrap())
    }

    fn loc(ch: &str, id: &str) -> MessageLocator {
        MessageLocator::new(ChannelId::new(ch).unwrap(), MessageId::new(id).unwrap())
    }

    fn msg(ch: &str, id: &str) -> Message {
        Message::new(loc(ch, id), json!({ "id": id }))
    }

    #[tokio::test]
    async fn test_survives_one_dead_child() {
        let (children, faulty) = faulty_children(3);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");

        ps.new_subscriber(&ctx, &s1).await.unwrap();
        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();
        faulty[1].kill();

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert_eq!(fetched.messages, vec![msg("ch", "m1")]);
        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert!(fetched.messages.is_empty());
        assert!(fetched.ack_handle.is_none());
    }

    #[tokio::test]
    async fn test_fails_when_every_child_fails() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        for f in &faulty {
            f.kill();
        }
        assert!(ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.is_err());
        assert!(ps.new_subscriber(&ctx, &sl("ch", "s1")).await.is_err());

        for f in &faulty {
            f.revive();
        }
        let err = ps
            .fetch_messages(&ctx, &sl("ch", "nobody"), 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_subscription_not_found());
    }

    #[tokio::test]
    async fn test_duplicates_are_merged_and_stale_messages_filtered() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");
        ps.new_subscriber(&ctx, &s1).await.unwrap();
        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();

        // s2 misses the acknowledgement of m1.
        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        faulty[1].kill();
        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();
        faulty[1].revive();

        // s1 returns only m2, s2 returns m1 (stale) and m2.
        ps.publish_messages(&ctx, &[msg("ch", "m2")]).await.unwrap();
        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert_eq!(fetched.messages, vec![msg("ch", "m2")]);
        assert_eq!(mux.multiplex_stat().stale_messages_filtered, 1);

        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();
        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert!(fetched.messages.is_empty());
    }

    #[tokio::test]
    async fn test_only_stale_messages_advance_lagging_child() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");
        ps.new_subscriber(&ctx, &s1).await.unwrap();
        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        faulty[1].kill();
        ps.acknowledge_messages(&ctx, fetched.ack_handle.as_ref().unwrap())
            .await
            .unwrap();
        faulty[1].revive();

        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert!(fetched.messages.is_empty());
        assert!(fetched.ack_handle.is_none());

        let lagging = faulty[1].as_pubsub().unwrap();
        let direct = lagging.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert!(direct.messages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_subscriber_is_recovered() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");

        faulty[1].kill();
        ps.new_subscriber(&ctx, &s1).await.unwrap();
        faulty[1].revive();

        ps.fetch_messages(&ctx, &s1, 10, Duration::ZERO).await.unwrap();
        assert_eq!(mux.multiplex_stat().recovered_subscribers, 1);

        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();
        let direct = faulty[1]
            .as_pubsub()
            .unwrap()
            .fetch_messages(&ctx, &s1, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(direct.messages, vec![msg("ch", "m1")]);
    }

    #[tokio::test]
    async fn test_fetch_returns_early_when_one_child_has_messages() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");
        ps.new_subscriber(&ctx, &s1).await.unwrap();

        // Only s1 has the message; s2 keeps long-polling until canceled.
        faulty[1].kill();
        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();
        faulty[1].revive();

        let started = Instant::now();
        let fetched = ps.fetch_messages(&ctx, &s1, 10, Duration::from_secs(20)).await.unwrap();
        assert_eq!(fetched.messages, vec![msg("ch", "m1")]);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(mux.multiplex_stat().early_returns, 1);
    }

    #[tokio::test]
    async fn test_is_old_messages_never_fails() {
        let (children, faulty) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let ctx = Context::background();
        let s1 = sl("ch", "s1");

        ps.publish_messages(&ctx, &[msg("ch", "m1")]).await.unwrap();
        ps.new_subscriber(&ctx, &s1).await.unwrap();

        // s1 is down; s2 still knows m1 predates the subscriber.
        faulty[0].kill();
        let old = ps
            .is_old_messages(&ctx, &s1, &[loc("ch", "m1"), loc("ch", "m2")])
            .await
            .unwrap();
        assert!(old[&loc("ch", "m1")]);
        assert!(!old[&loc("ch", "m2")]);

        faulty[1].kill();
        let old = ps.is_old_messages(&ctx, &s1, &[loc("ch", "m1")]).await.unwrap();
        assert!(!old[&loc("ch", "m1")]);
        assert!(ps.is_old_messages(&ctx, &s1, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_rejects_malformed_handle() {
        let (children, _) = faulty_children(2);
        let mux = multiplexer_of(&children);
        let ps = mux.as_pubsub().unwrap();
        let handle = dsps_types::AckHandle::new(sl("ch", "s1"), "not base64!");
        let err = ps
            .acknowledge_messages(&Context::background(), &handle)
            .await
            .unwrap_err();
        assert!(err.is_malformed_ack_handle());
    }
}
