//! Validated identifiers.
//!
//! Channel, subscriber and message ids share one grammar:
//! a lowercase alphanumeric head followed by up to 62 of `[0-9a-z_-]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of channel / subscriber / message ids.
pub const MAX_ID_LENGTH: usize = 63;

/// Identifier parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} \"{value}\": must match ^[0-9a-z][0-9a-z_-]{{0,62}}$")]
pub struct IdError {
    pub kind: &'static str,
    pub value: String,
}

fn is_valid_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    match bytes.first() {
        Some(head) if head.is_ascii_digit() || head.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.len() <= MAX_ID_LENGTH
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase() || *b == b'_' || *b == b'-')
}

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if is_valid_id(&value) {
                    Ok(Self(value))
                } else {
                    Err(IdError { kind: $kind, value })
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_id!(
    /// Channel identifier.
    ChannelId,
    "channel ID"
);
validated_id!(
    /// Subscriber identifier, unique within a channel.
    SubscriberId,
    "subscriber ID"
);
validated_id!(
    /// Message identifier, unique within a channel.
    MessageId,
    "message ID"
);

/// Unique and persistent identifier of a configured storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(String);

impl StorageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
