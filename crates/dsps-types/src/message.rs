//! Messages, locators and AckHandles.

use crate::errors::StorageError;
use crate::ids::{ChannelId, MessageId, SubscriberId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Locates a message: `(channel, message id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLocator {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "messageID")]
    pub message_id: MessageId,
}

impl MessageLocator {
    #[must_use]
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// Locates a subscriber: `(channel, subscriber id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberLocator {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "subscriberID")]
    pub subscriber_id: SubscriberId,
}

impl SubscriberLocator {
    #[must_use]
    pub fn new(channel_id: ChannelId, subscriber_id: SubscriberId) -> Self {
        Self {
            channel_id,
            subscriber_id,
        }
    }
}

impl fmt::Display for SubscriberLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.subscriber_id)
    }
}

/// A published datagram. `content` is an arbitrary JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub locator: MessageLocator,
    pub content: serde_json::Value,
}

impl Message {
    #[must_use]
    pub fn new(locator: MessageLocator, content: serde_json::Value) -> Self {
        Self { locator, content }
    }

    /// Build a message from raw JSON text.
    pub fn from_json(locator: MessageLocator, raw: &str) -> Result<Self, StorageError> {
        let content = serde_json::from_str(raw).map_err(|e| {
            StorageError::MalformedMessage(format!(
                "content of message {locator} is not valid JSON: {e}"
            ))
        })?;
        Ok(Self { locator, content })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.locator.channel_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.locator.message_id
    }
}

/// Returns true when every message belongs to the same channel (or the list is empty).
pub fn belongs_to_same_channel(msgs: &[Message]) -> bool {
    match msgs.first() {
        None => true,
        Some(first) => msgs.iter().all(|m| m.channel_id() == first.channel_id()),
    }
}

/// Opaque cursor returned by a fetch and consumed by an acknowledge.
///
/// The subscriber locator travels outside the opaque `handle` so that storages can
/// bind the handle to its subscriber with a checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckHandle {
    #[serde(flatten)]
    pub locator: SubscriberLocator,
    pub handle: String,
}

impl AckHandle {
    #[must_use]
    pub fn new(locator: SubscriberLocator, handle: impl Into<String>) -> Self {
        Self {
            locator,
            handle: handle.into(),
        }
    }
}
