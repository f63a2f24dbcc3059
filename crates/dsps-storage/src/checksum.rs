//! Checksums that bind an opaque handle to the subscriber it was issued for.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use dsps_types::SubscriberLocator;

/// CRC-32 (IEEE) over `domain \0 channel \0 subscriber \0 payload`, as unpadded base64 of
/// its big-endian bytes.
pub(crate) fn subscriber_checksum(domain: &str, sl: &SubscriberLocator, payload: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(&[0]);
    hasher.update(sl.channel_id.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(sl.subscriber_id.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(payload);
    STANDARD_NO_PAD.encode(hasher.finalize().to_be_bytes())
}
