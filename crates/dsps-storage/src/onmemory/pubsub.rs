use async_trait::async_trait;
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::clock::add_duration;
use dsps_types::message::belongs_to_same_channel;
use dsps_types::{
    AckHandle, Context, FetchResult, Message, MessageLocator, PubSubStorage, StorageError, SubscriberLocator,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::ack_handle::{decode_ack_handle, encode_ack_handle};
use super::{OnmemoryStorage, StoredMessage, SubscriberState, POLLING_INTERVAL};

#[async_trait]
impl PubSubStorage for OnmemoryStorage {
    async fn new_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock(ctx).await?;
        let now = self.inner.clock.now();
        let ch = state.channel_mut(self.inner.channel_provider.as_ref(), &sl.channel_id)?;
        let cursor = ch.clock;
        ch.subscribers
            .entry(sl.subscriber_id.clone())
            .or_insert_with(|| SubscriberState {
                last_activity: now,
                cursor,
                queue: Vec::new(),
            });
        Ok(())
    }

    async fn remove_subscriber(&self, ctx: &Context, sl: &SubscriberLocator) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock(ctx).await?;
        match state.channel_mut(self.inner.channel_provider.as_ref(), &sl.channel_id) {
            Ok(ch) => {
                ch.subscribers.remove(&sl.subscriber_id);
            }
            // No channel, no subscriber.
            Err(e) if e.is_invalid_channel() => return Ok(()),
            Err(e) => return Err(e),
        }
        drop(state);
        self.inner.new_message.notify_waiters();
        Ok(())
    }

    async fn publish_messages(&self, ctx: &Context, msgs: &[Message]) -> Result<(), StorageError> {
        if !belongs_to_same_channel(msgs) {
            return Err(StorageError::Internal("Messages belongs to various channels".into()));
        }
        let Some(first) = msgs.first() else {
            return Ok(());
        };

        let mut state = self.inner.state.lock(ctx).await?;
        let now = self.inner.clock.now();
        let ch = state.channel_mut(self.inner.channel_provider.as_ref(), first.channel_id())?;
        let expire_at = add_duration(now, ch.channel.expire());

        let mut published = 0usize;
        for msg in msgs {
            if ch.log.contains_key(&msg.locator) {
                continue;
            }
            ch.clock += 1;
            let stored = Arc::new(StoredMessage {
                message: msg.clone(),
                clock: ch.clock,
                expire_at,
            });
            ch.log.insert(msg.locator.clone(), Arc::clone(&stored));
            for sbsc in ch.subscribers.values_mut() {
                sbsc.queue.push(Arc::clone(&stored));
                sbsc.last_activity = now;
            }
            published += 1;
        }
        drop(state);

        if published > 0 {
            self.inner.new_message.notify_waiters();
        }
        Ok(())
    }

    async fn fetch_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        max: usize,
        wait: Duration,
    ) -> Result<FetchResult, StorageError> {
        {
            let mut state = self.inner.state.lock(ctx).await?;
            state.subscriber_mut(self.inner.channel_provider.as_ref(), sl)?;
        }

        let give_up_at = Instant::now() + wait;
        loop {
            let notified = self.inner.new_message.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (messages, more_messages) = {
                let mut state = self.inner.state.lock(ctx).await?;
                let now = self.inner.clock.now();
                let sbsc = state.subscriber_mut(self.inner.channel_provider.as_ref(), sl)?;
                sbsc.last_activity = now;
                let messages: Vec<Message> = sbsc.queue.iter().take(max).map(|m| m.message.clone()).collect();
                (messages, sbsc.queue.len() > max)
            };

            if let Some(last) = messages.last() {
                let ack_handle = encode_ack_handle(sl, last.message_id())?;
                return Ok(FetchResult {
                    messages,
                    more_messages,
                    ack_handle: Some(ack_handle),
                });
            }
            if more_messages {
                return Ok(FetchResult {
                    more_messages,
                    ..FetchResult::empty()
                });
            }
            if Instant::now() >= give_up_at {
                return Ok(FetchResult::empty());
            }

            tokio::select! {
                cause = ctx.done() => return Err(cause.into()),
                _ = &mut notified => {}
                _ = tokio::time::sleep(POLLING_INTERVAL) => {}
                _ = tokio::time::sleep_until(give_up_at) => {}
            }
        }
    }

    async fn acknowledge_messages(&self, ctx: &Context, handle: &AckHandle) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock(ctx).await?;
        let now = self.inner.clock.now();
        let sbsc = state.subscriber_mut(self.inner.channel_provider.as_ref(), &handle.locator)?;
        sbsc.last_activity = now;

        let last_message_id = decode_ack_handle(handle)?;
        let Some(read_until) = sbsc
            .queue
            .iter()
            .position(|m| m.message.message_id() == &last_message_id)
        else {
            log_event!(debug, CATEGORY_STORAGE, "stale AckHandle ignored", subscriber = %handle.locator);
            return Ok(());
        };
        sbsc.cursor = sbsc.queue[read_until].clock;
        sbsc.queue.drain(..=read_until);
        Ok(())
    }

    async fn is_old_messages(
        &self,
        ctx: &Context,
        sl: &SubscriberLocator,
        msgs: &[MessageLocator],
    ) -> Result<HashMap<MessageLocator, bool>, StorageError> {
        let mut state = self.inner.state.lock(ctx).await?;
        let ch = state.channel_mut(self.inner.channel_provider.as_ref(), &sl.channel_id)?;
        let sbsc = ch
            .subscribers
            .get(&sl.subscriber_id)
            .ok_or_else(|| StorageError::SubscriptionNotFound(sl.to_string()))?;

        Ok(msgs
            .iter()
            .map(|loc| {
                let old = ch.log.get(loc).is_some_and(|m| m.clock <= sbsc.cursor);
                (loc.clone(), old)
            })
            .collect())
    }
}
