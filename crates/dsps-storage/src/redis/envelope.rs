use dsps_types::{Message, MessageId, MessageLocator, StorageError, SubscriberLocator};
use serde::{Deserialize, Serialize};

/// Stored form of a message body.
#[derive(Debug, Serialize, Deserialize)]
struct MessageEnvelope<C> {
    id: MessageId,
    content: C,
}

pub(crate) fn wrap_envelope(msg: &Message) -> Result<String, StorageError> {
    serde_json::to_string(&MessageEnvelope {
        id: msg.message_id().clone(),
        content: &msg.content,
    })
    .map_err(|e| StorageError::MalformedMessage(format!("unable to encode message {}: {e}", msg.locator)))
}

pub(crate) fn unwrap_envelope(sl: &SubscriberLocator, raw: &str) -> Result<Message, StorageError> {
    let envelope: MessageEnvelope<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| StorageError::MalformedMessage(format!("corrupted message envelope: {e}")))?;
    Ok(Message::new(
        MessageLocator::new(sl.channel_id.clone(), envelope.id),
        envelope.content,
    ))
}
