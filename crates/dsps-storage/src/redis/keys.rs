use dsps_types::{ChannelId, JwtJti, MessageId, SubscriberId};

use super::clock::ChannelClock;

/// Keys of one channel. Every key carries the channel id inside a hash tag so that
/// a cluster places all of them on the same slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelKeys<'a> {
    channel_id: &'a ChannelId,
}

pub(crate) fn keys_of_channel(channel_id: &ChannelId) -> ChannelKeys<'_> {
    ChannelKeys { channel_id }
}

impl ChannelKeys<'_> {
    /// Latest channel clock.
    pub(crate) fn clock(&self) -> String {
        format!("c.{{{}}}.clock", self.channel_id)
    }

    /// Clock of the last message the subscriber acknowledged.
    pub(crate) fn subscriber_cursor(&self, sbsc: &SubscriberId) -> String {
        format!("c.{{{}}}.r.{}", self.channel_id, sbsc)
    }

    pub(crate) fn message_body_prefix(&self) -> String {
        format!("c.{{{}}}.m.", self.channel_id)
    }

    /// Must start with [`Self::message_body_prefix`].
    pub(crate) fn message_body(&self, clock: ChannelClock) -> String {
        format!("c.{{{}}}.m.{}", self.channel_id, clock)
    }

    /// Clock assigned to the message id.
    pub(crate) fn message_dedup(&self, id: &MessageId) -> String {
        format!("c.{{{}}}.mid.{}", self.channel_id, id)
    }
}

pub(crate) fn jwt_revocation_key(jti: &JwtJti) -> String {
    format!("jwt.{{{}}}.revoke", jti)
}

pub(crate) const PUBSUB_PATTERN: &str = "dsps.c.*";

/// Matches [`PUBSUB_PATTERN`]; `#` never appears in a channel id.
pub(crate) const PUBSUB_HEARTBEAT_CHANNEL: &str = "dsps.c.#heartbeat";

/// Redis Pub/Sub channel that announces new messages of the channel.
pub(crate) fn pubsub_channel_of(channel_id: &ChannelId) -> String {
    format!("dsps.c.{}", channel_id)
}
