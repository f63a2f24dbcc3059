use async_trait::async_trait;
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::message::belongs_to_same_channel;
use dsps_types::{
    AckHandle, Context, FetchResult, Message, MessageLocator, PubSubStorage, StorageError, SubscriberLocator,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::ack_handle::{decode_ack_handle, encode_ack_handle};
use super::clock::{is_clock_within, iterate_clocks, parse_channel_clock, ChannelClock};
use super::envelope::unwrap_envelope;
use super::keys::{keys_of_channel, pubsub_channel_of, ChannelKeys};
use super::scripts::{run_ack_script, run_create_subscriber_script, run_publish_message_script, PublishOutcome};
use super::RedisStorage;

const NEW_MESSAGE_NOTIFICATION: &str = "new message";

fn parse_clock_value(value: Option<&Option<String>>) -> Option<ChannelClock> {
    value.and_then(Option::as_deref).and_then(parse_channel_clock)
}

impl RedisStorage {
    /// Channel clock and subscriber cursor; both must exist.
    async fn fetch_cursor(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        keys: &ChannelKeys<'_>,
        ttl_sec: u64,
    ) -> Result<(ChannelClock, ChannelClock), StorageError> {
        let cursor_keys = [keys.clock(), keys.subscriber_cursor(&sl.subscriber_id)];
        let values = self
            .cmd()
            .mget(ctx, &cursor_keys)
            .await
            .map_err(|e| e.into_storage_error("FetchMessages failed due to Redis error (cursor MGET error)"))?;
        let (Some(channel_clock), Some(sbsc_clock)) = (parse_clock_value(values.first()), parse_clock_value(values.get(1)))
        else {
            return Err(StorageError::SubscriptionNotFound(sl.to_string()));
        };

        // Fetching alone keeps an idle channel and its subscriber alive.
        if let Err(e) = self.cmd().expire(ctx, &cursor_keys, ttl_sec).await {
            log_event!(warn, CATEGORY_STORAGE, "Failed to extend TTL of subscriber", subscriber = %sl, error = %e);
        }
        Ok((channel_clock, sbsc_clock))
    }

    /// Loads the bodies of `clocks`, skipping expired and corrupted ones.
    async fn load_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        keys: &ChannelKeys<'_>,
        clocks: &[ChannelClock],
    ) -> Result<Vec<Message>, StorageError> {
        let body_keys: Vec<String> = clocks.iter().map(|clock| keys.message_body(*clock)).collect();
        let bodies = self
            .cmd()
            .mget(ctx, &body_keys)
            .await
            .map_err(|e| e.into_storage_error("FetchMessages failed due to Redis error (msg MGET error)"))?;

        let mut messages = Vec::with_capacity(bodies.len());
        for (clock, body) in clocks.iter().zip(bodies) {
            let Some(raw) = body else {
                log_event!(debug, CATEGORY_STORAGE, "Message body expired", subscriber = %sl, clock = *clock);
                continue;
            };
            match unwrap_envelope(sl, &raw) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    log_event!(warn, CATEGORY_STORAGE, "Skipping corrupted message", subscriber = %sl, clock = *clock, error = %e);
                }
            }
        }
        Ok(messages)
    }

    async fn fetch_now(&self, ctx: &Context, sl: &SubscriberLocator, max: usize) -> Result<FetchResult, StorageError> {
        let ttl_sec = self.channel_ttl_sec(&sl.channel_id)?;
        let keys = keys_of_channel(&sl.channel_id);
        let (channel_clock, sbsc_clock) = self.fetch_cursor(ctx, sl, &keys, ttl_sec).await?;

        let mut from = sbsc_clock;
        loop {
            let mut clocks = iterate_clocks(max.saturating_add(1), from, channel_clock);
            let more_messages = clocks.len() > max;
            clocks.truncate(max);
            let Some(&last) = clocks.last() else {
                return Ok(FetchResult {
                    more_messages,
                    ..FetchResult::empty()
                });
            };

            let messages = self.load_messages(ctx, sl, &keys, &clocks).await?;
            if !messages.is_empty() {
                return Ok(FetchResult {
                    messages,
                    more_messages,
                    ack_handle: Some(encode_ack_handle(sl, last)?),
                });
            }
            // Whole batch expired or corrupted; the next ack handle covers it.
            from = last;
        }
    }
}

#[async_trait]
impl PubSubStorage for RedisStorage {
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let ttl_sec = self.channel_ttl_sec(&sl.channel_id)?;
        run_create_subscriber_script(
            ctx,
            self.cmd(),
            &self.inner.scripts,
            &sl.channel_id,
            ttl_sec,
            &sl.subscriber_id,
        )
        .await
    }

    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let keys = keys_of_channel(&sl.channel_id);
        self.cmd()
            .del(ctx, &keys.subscriber_cursor(&sl.subscriber_id))
            .await
            .map_err(|e| e.into_storage_error("Failed to delete subscriber"))
    }

    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError> {
        if !belongs_to_same_channel(msgs) {
            return Err(StorageError::Internal("Messages belongs to various channels".into()));
        }
        let Some(first) = msgs.first() else {
            return Ok(());
        };
        let channel_id = first.channel_id();
        let ttl_sec = self.channel_ttl_sec(channel_id)?;

        let mut published = 0usize;
        let mut failure = None;
        for msg in msgs {
            match run_publish_message_script(ctx, self.cmd(), &self.inner.scripts, ttl_sec, msg).await {
                Ok(PublishOutcome::Published) => published += 1,
                Ok(PublishOutcome::Duplicated) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if published > 0 {
            let notification = pubsub_channel_of(channel_id);
            if let Err(e) = self.cmd().publish(ctx, &notification, NEW_MESSAGE_NOTIFICATION).await {
                // Subscribers still see the messages on their next poll.
                log_event!(warn, CATEGORY_STORAGE, "Failed to PUBLISH new message notification", channel_id = %channel_id, error = %e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError> {
        let give_up_at = Instant::now() + wait;
        let notification = pubsub_channel_of(&sl.channel_id);
        loop {
            // Registered before reading so that a PUBLISH in between is not missed.
            let mut awaiter = self.dispatcher.as_ref().map(|d| d.await_channel(&notification));

            let result = self.fetch_now(ctx, sl, max).await?;
            if !result.messages.is_empty() || result.more_messages || Instant::now() >= give_up_at {
                return Ok(result);
            }
            let Some(awaiter) = awaiter.as_mut() else {
                return Ok(result);
            };

            tokio::select! {
                cause = ctx.done() => return Err(cause.into()),
                woke = awaiter.wait() => {
                    woke.map_err(|e| StorageError::backend("FetchMessages interrupted", e))?;
                }
                _ = tokio::time::sleep_until(give_up_at) => return Ok(FetchResult::empty()),
            }
        }
    }

    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError> {
        let clock = decode_ack_handle(handle)?;
        let sl = &handle.locator;
        let ttl_sec = self.channel_ttl_sec(&sl.channel_id)?;
        run_ack_script(
            ctx,
            self.cmd(),
            &self.inner.scripts,
            &sl.channel_id,
            ttl_sec,
            &sl.subscriber_id,
            clock,
        )
        .await
    }

    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError> {
        let keys = keys_of_channel(&sl.channel_id);
        let same_channel: Vec<&MessageLocator> = msgs.iter().filter(|m| m.channel_id == sl.channel_id).collect();

        let mut query = Vec::with_capacity(2 + same_channel.len());
        query.push(keys.clock());
        query.push(keys.subscriber_cursor(&sl.subscriber_id));
        query.extend(same_channel.iter().map(|m| keys.message_dedup(&m.message_id)));
        let values = self
            .cmd()
            .mget(ctx, &query)
            .await
            .map_err(|e| e.into_storage_error("IsOldMessages failed due to Redis error"))?;

        let (Some(channel_clock), Some(sbsc_clock)) = (parse_clock_value(values.first()), parse_clock_value(values.get(1)))
        else {
            return Err(StorageError::SubscriptionNotFound(sl.to_string()));
        };

        let mut result: HashMap<MessageLocator, bool> = msgs.iter().map(|m| (m.clone(), false)).collect();
        for (loc, dedup) in same_channel.into_iter().zip(values.iter().skip(2)) {
            // Unknown or expired messages count as not old.
            let Some(msg_clock) = dedup.as_deref().and_then(parse_channel_clock) else {
                continue;
            };
            result.insert(loc.clone(), !is_clock_within(msg_clock, sbsc_clock, channel_clock));
        }
        Ok(result)
    }
}
