//! Lua scripts. Each one touches the keys of a single channel only, so it runs
//! atomically on the slot that owns the channel's hash tag.

use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{ChannelId, Context, Message, StorageError, SubscriberId};

use super::clock::{ChannelClock, CLOCK_MAX, CLOCK_MIN};
use super::connection::{RedisCmd, RedisScript};
use super::envelope::wrap_envelope;
use super::keys::keys_of_channel;

/// Returns status OK when stored, nil when the message id was already published.
const PUBLISH_MESSAGE_SCRIPT: &str = r#"
local clockKey = KEYS[1]           -- c.{channel}.clock
local msgBodyKeyPrefix = KEYS[2]   -- c.{channel}.m.
local msgDedupKey = KEYS[3]        -- c.{channel}.mid.{messageID}
local ttlSec = tonumber(ARGV[1])
local content = ARGV[2]
local clockMin = tonumber(ARGV[3])
local clockMax = tonumber(ARGV[4])

local nextClock = tonumber(redis.call("incr", clockKey))
local oldClock = nextClock - 1
if nextClock > clockMax then
    nextClock = clockMin
    redis.call("set", clockKey, string.format("%d", nextClock))
end
redis.call("expire", clockKey, ttlSec)

if redis.call("set", msgDedupKey, string.format("%d", nextClock), "EX", ttlSec, "NX") == false then
    redis.call("set", clockKey, string.format("%d", oldClock))
    redis.call("expire", clockKey, ttlSec)
    return false
end
redis.call("set", msgBodyKeyPrefix .. string.format("%d", nextClock), content, "EX", ttlSec)
return redis.status_reply("OK")
"#;

const ACK_SCRIPT: &str = r#"
local channelClockKey = KEYS[1]    -- c.{channel}.clock
local sbscClockKey = KEYS[2]       -- c.{channel}.r.{subscriber}
local ttlSec = tonumber(ARGV[1])
local acknowledgedClock = tonumber(ARGV[2])

local channelClock = redis.call("get", channelClockKey)
local sbscClock = redis.call("get", sbscClockKey)
if channelClock == false then return "channel-not-found" end
if sbscClock == false then return "subscription-not-found" end
channelClock = tonumber(channelClock)
sbscClock = tonumber(sbscClock)

if channelClock < sbscClock then
    -- (sbscClock, clockMax] and [clockMin, channelClock]
    if not ((sbscClock < acknowledgedClock) or (acknowledgedClock <= channelClock)) then
        return "stale"
    end
else
    -- (sbscClock, channelClock]
    if not ((sbscClock < acknowledgedClock) and (acknowledgedClock <= channelClock)) then
        return "stale"
    end
end
redis.call("set", sbscClockKey, string.format("%d", acknowledgedClock), "EX", ttlSec)
redis.call("expire", channelClockKey, ttlSec)
return redis.status_reply("OK")
"#;

/// Returns status OK when created, nil when the subscriber already exists.
const CREATE_SUBSCRIBER_SCRIPT: &str = r#"
local clockKey = KEYS[1]           -- c.{channel}.clock
local subscriberKey = KEYS[2]      -- c.{channel}.r.{subscriber}
local ttlSec = tonumber(ARGV[1])

local chClock = tonumber(redis.call("get", clockKey))
if chClock == nil then
    chClock = 0
    redis.call("set", clockKey, 0, "EX", ttlSec)
else
    redis.call("expire", clockKey, ttlSec)
end

return redis.call("set", subscriberKey, string.format("%d", chClock), "EX", ttlSec, "NX")
"#;

#[derive(Debug)]
pub(crate) struct Scripts {
    pub(crate) publish_message: RedisScript,
    pub(crate) ack: RedisScript,
    pub(crate) create_subscriber: RedisScript,
}

impl Scripts {
    pub(crate) fn new() -> Self {
        Self {
            publish_message: RedisScript::new("publishMessageScript", PUBLISH_MESSAGE_SCRIPT),
            ack: RedisScript::new("ackScript", ACK_SCRIPT),
            create_subscriber: RedisScript::new("createSubscriberScript", CREATE_SUBSCRIBER_SCRIPT),
        }
    }

    fn all(&self) -> [&RedisScript; 3] {
        [&self.publish_message, &self.ack, &self.create_subscriber]
    }

    /// `SCRIPT LOAD` every script so that EVALSHA hits the script cache.
    pub(crate) async fn load(&self, ctx: &Context, cmd: &dyn RedisCmd) -> Result<(), StorageError> {
        log_event!(debug, CATEGORY_STORAGE, "Loading Redis Lua scripts...");
        for script in self.all() {
            cmd.load_script(ctx, script)
                .await
                .map_err(|e| e.into_storage_error(format!("Failed to load {}", script.name())))?;
        }
        Ok(())
    }
}

/// Outcome of the publish script for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PublishOutcome {
    Published,
    Duplicated,
}

pub(crate) async fn run_publish_message_script(
    ctx: &Context,
    cmd: &dyn RedisCmd,
    scripts: &Scripts,
    ttl_sec: u64,
    msg: &Message,
) -> Result<PublishOutcome, StorageError> {
    let wrapped = wrap_envelope(msg)?;
    let keys = keys_of_channel(msg.channel_id());
    let result = cmd
        .run_script(
            ctx,
            &scripts.publish_message,
            &[keys.clock(), keys.message_body_prefix(), keys.message_dedup(msg.message_id())],
            &[ttl_sec.to_string(), wrapped, CLOCK_MIN.to_string(), CLOCK_MAX.to_string()],
        )
        .await
        .map_err(|e| e.into_storage_error("Failed to execute publishMessageScript"))?;
    match result.as_deref() {
        None => {
            log_event!(debug, CATEGORY_STORAGE, "Duplicated message", message = %msg.locator);
            Ok(PublishOutcome::Duplicated)
        }
        Some("OK") => Ok(PublishOutcome::Published),
        Some(other) => Err(StorageError::Internal(format!(
            "Unexpected result from publishMessageScript: {other}"
        ))),
    }
}

pub(crate) async fn run_ack_script(
    ctx: &Context,
    cmd: &dyn RedisCmd,
    scripts: &Scripts,
    channel_id: &ChannelId,
    ttl_sec: u64,
    sbsc_id: &SubscriberId,
    acknowledged: ChannelClock,
) -> Result<(), StorageError> {
    let keys = keys_of_channel(channel_id);
    let result = cmd
        .run_script(
            ctx,
            &scripts.ack,
            &[keys.clock(), keys.subscriber_cursor(sbsc_id)],
            &[ttl_sec.to_string(), acknowledged.to_string()],
        )
        .await
        .map_err(|e| e.into_storage_error("Failed to execute ackScript"))?;
    match result.as_deref() {
        Some("OK") => Ok(()),
        Some(reason @ ("channel-not-found" | "subscription-not-found")) => Err(StorageError::SubscriptionNotFound(
            format!("{channel_id}/{sbsc_id} ({reason})"),
        )),
        Some("stale") => {
            // Retried acknowledgement.
            log_event!(debug, CATEGORY_STORAGE, "Stale AckHandle ignored", channel_id = %channel_id, subscriber_id = %sbsc_id, clock = acknowledged);
            Ok(())
        }
        other => Err(StorageError::Internal(format!("Unexpected result from ackScript: {other:?}"))),
    }
}

pub(crate) async fn run_create_subscriber_script(
    ctx: &Context,
    cmd: &dyn RedisCmd,
    scripts: &Scripts,
    channel_id: &ChannelId,
    ttl_sec: u64,
    sbsc_id: &SubscriberId,
) -> Result<(), StorageError> {
    let keys = keys_of_channel(channel_id);
    let result = cmd
        .run_script(
            ctx,
            &scripts.create_subscriber,
            &[keys.clock(), keys.subscriber_cursor(sbsc_id)],
            &[ttl_sec.to_string()],
        )
        .await
        .map_err(|e| e.into_storage_error("Failed to execute createSubscriberScript"))?;
    match result.as_deref() {
        None => {
            log_event!(debug, CATEGORY_STORAGE, "Subscriber already exists", channel_id = %channel_id, subscriber_id = %sbsc_id);
            Ok(())
        }
        Some("OK") => Ok(()),
        Some(other) => Err(StorageError::Internal(format!(
            "Unexpected result from createSubscriberScript: {other}"
        ))),
    }
}
