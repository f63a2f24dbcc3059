use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dsps_types::{AckHandle, StorageError, StorageId};
use std::collections::BTreeMap;

/// Bundles the per-storage handles of one fetch. Every handle must belong to the
/// same subscriber.
pub(crate) fn encode_multiplex_ack_handle(handles: &BTreeMap<StorageId, AckHandle>) -> Result<AckHandle, StorageError> {
    let mut handles_iter = handles.values();
    let Some(first) = handles_iter.next() else {
        return Err(StorageError::Internal("[BUG] no AckHandle to multiplex".into()));
    };
    if let Some(other) = handles_iter.find(|h| h.locator != first.locator) {
        return Err(StorageError::Internal(format!(
            "[BUG] Inconsistent SubscriberLocator {}, {}",
            first.locator, other.locator
        )));
    }

    let raw: BTreeMap<&StorageId, &str> = handles.iter().map(|(id, h)| (id, h.handle.as_str())).collect();
    let json = serde_json::to_vec(&raw)
        .map_err(|e| StorageError::Internal(format!("Failed to encode MultiplexAckHandle ({raw:?}): {e}")))?;
    Ok(AckHandle::new(first.locator.clone(), STANDARD.encode(json)))
}

pub(crate) fn decode_multiplex_ack_handle(h: &AckHandle) -> Result<BTreeMap<StorageId, AckHandle>, StorageError> {
    let json = STANDARD.decode(&h.handle).map_err(|e| {
        StorageError::MalformedAckHandle(format!("Failed to base64 decode MultiplexAckHandle \"{}\": {e}", h.handle))
    })?;
    let raw: BTreeMap<StorageId, String> = serde_json::from_slice(&json).map_err(|e| {
        StorageError::MalformedAckHandle(format!("Failed to JSON decode MultiplexAckHandle \"{}\": {e}", h.handle))
    })?;
    Ok(raw
        .into_iter()
        .map(|(id, handle)| (id, AckHandle::new(h.locator.clone(), handle)))
        .collect())
}
