use dsps_types::{AckHandle, MessageId, StorageError, SubscriberLocator};
use serde::{Deserialize, Serialize};

use crate::checksum::subscriber_checksum;

const CHECKSUM_DOMAIN: &str = "dsps.storage.on-memory";

#[derive(Debug, Serialize, Deserialize)]
struct AckHandleData {
    #[serde(rename = "mid")]
    last_message_id: MessageId,
    #[serde(rename = "xs", default)]
    checksum: String,
}

fn checksum(sl: &SubscriberLocator, last_message_id: &MessageId) -> String {
    subscriber_checksum(CHECKSUM_DOMAIN, sl, last_message_id.as_str().as_bytes())
}

/// Handle pointing at the last message a fetch returned.
pub(crate) fn encode_ack_handle(sl: &SubscriberLocator, last_message_id: &MessageId) -> Result<AckHandle, StorageError> {
    let data = AckHandleData {
        last_message_id: last_message_id.clone(),
        checksum: checksum(sl, last_message_id),
    };
    let encoded = serde_json::to_string(&data)
        .map_err(|e| StorageError::Internal(format!("failed to encode on-memory AckHandle ({data:?}): {e}")))?;
    Ok(AckHandle::new(sl.clone(), encoded))
}

pub(crate) fn decode_ack_handle(h: &AckHandle) -> Result<MessageId, StorageError> {
    let data: AckHandleData = serde_json::from_str(&h.handle).map_err(|e| {
        StorageError::MalformedAckHandle(format!("Invalid on-memory AckHandle ({}), JSON parse error: {e}", h.handle))
    })?;
    if checksum(&h.locator, &data.last_message_id) != data.checksum {
        return Err(StorageError::MalformedAckHandle(format!(
            "Corrupted AckHandle ({}), checksum unmatch",
            h.handle
        )));
    }
    Ok(data.last_message_id)
}
