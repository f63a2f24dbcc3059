use dsps_types::{AckHandle, StorageError, SubscriberLocator};
use serde::{Deserialize, Serialize};

use super::clock::ChannelClock;
use crate::checksum::subscriber_checksum;

const CHECKSUM_DOMAIN: &str = "dsps.storage.redis";

#[derive(Debug, Serialize, Deserialize)]
struct AckHandleData {
    #[serde(rename = "clk")]
    last_message_clock: ChannelClock,
    #[serde(rename = "xs", default)]
    checksum: String,
}

fn checksum(sl: &SubscriberLocator, clock: ChannelClock) -> String {
    subscriber_checksum(CHECKSUM_DOMAIN, sl, &clock.to_be_bytes())
}

pub(crate) fn encode_ack_handle(sl: &SubscriberLocator, last_message_clock: ChannelClock) -> Result<AckHandle, StorageError> {
    let data = AckHandleData {
        last_message_clock,
        checksum: checksum(sl, last_message_clock),
    };
    let encoded = serde_json::to_string(&data)
        .map_err(|e| StorageError::Internal(format!("failed to encode Redis AckHandle ({data:?}): {e}")))?;
    Ok(AckHandle::new(sl.clone(), encoded))
}

pub(crate) fn decode_ack_handle(h: &AckHandle) -> Result<ChannelClock, StorageError> {
    let data: AckHandleData = serde_json::from_str(&h.handle).map_err(|e| {
        StorageError::MalformedAckHandle(format!("Invalid Redis AckHandle ({}), JSON parse error: {e}", h.handle))
    })?;
    if checksum(&h.locator, data.last_message_clock) != data.checksum {
        return Err(StorageError::MalformedAckHandle(format!(
            "Corrupted AckHandle ({}), checksum unmatch",
            h.handle
        )));
    }
    Ok(data.last_message_clock)
}
