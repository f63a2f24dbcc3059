//! Storage error taxonomy.
//!
//! Every error carries a stable code (see [`StorageError::code`]) that callers use
//! for policy decisions instead of matching concrete variants through wrappers.

use crate::config::ConfigError;
use crate::context::{CancelCause, LockCanceled};
use thiserror::Error;

/// Boxed error for backend failures (Redis, HTTP, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const CODE_INVALID_CHANNEL: &str = "dsps.storage.invalid-channel";
pub const CODE_SUBSCRIPTION_NOT_FOUND: &str = "dsps.storage.subscription-not-found";
pub const CODE_MALFORMED_ACK_HANDLE: &str = "dsps.storage.ack-handle-malformed";
pub const CODE_MALFORMED_MESSAGE: &str = "dsps.storage.message-malformed";

/// Errors surfaced by storages and the channel provider.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Channel id does not match any configured channel.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Named subscriber does not exist (or has expired).
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Checksum mismatch, corrupt encoding or a handle of another subscriber.
    #[error("malformed AckHandle: {0}")]
    MalformedAckHandle(String),

    /// Message content could not be encoded or decoded as JSON.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Lock acquisition aborted by cancellation.
    #[error(transparent)]
    LockCanceled(#[from] LockCanceled),

    /// Operation aborted by cancellation or deadline.
    #[error(transparent)]
    Canceled(#[from] CancelCause),

    /// Channel resolution failed for a reason other than "no such channel".
    #[error("channel configuration error on \"{channel_id}\": {source}")]
    ChannelConfiguration {
        channel_id: String,
        #[source]
        source: Box<StorageError>,
    },

    /// Failure of one child of a multiplexed storage.
    #[error("{operation} failed on storage \"{storage_id}\": {source}")]
    Child {
        operation: &'static str,
        storage_id: String,
        #[source]
        source: Box<StorageError>,
    },

    /// Transport or backend failure.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Wrap a backend error with a short description of the failed action.
    pub fn backend(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Stable code of this error, looking through wrappers.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidChannel(_) => Some(CODE_INVALID_CHANNEL),
            Self::SubscriptionNotFound(_) => Some(CODE_SUBSCRIPTION_NOT_FOUND),
            Self::MalformedAckHandle(_) => Some(CODE_MALFORMED_ACK_HANDLE),
            Self::MalformedMessage(_) => Some(CODE_MALFORMED_MESSAGE),
            Self::ChannelConfiguration { source, .. } | Self::Child { source, .. } => {
                source.code()
            }
            _ => None,
        }
    }

    pub fn is_invalid_channel(&self) -> bool {
        self.code() == Some(CODE_INVALID_CHANNEL)
    }

    pub fn is_subscription_not_found(&self) -> bool {
        self.code() == Some(CODE_SUBSCRIPTION_NOT_FOUND)
    }

    pub fn is_malformed_ack_handle(&self) -> bool {
        self.code() == Some(CODE_MALFORMED_ACK_HANDLE)
    }

    /// Business errors that surface verbatim and never escalate to Sentry.
    pub fn is_non_fatal(&self) -> bool {
        self.is_invalid_channel() || self.is_subscription_not_found() || self.is_malformed_ack_handle()
    }

    /// True when the error was caused by cancellation or an expired deadline.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled(_) | Self::LockCanceled(_) => true,
            Self::ChannelConfiguration { source, .. } | Self::Child { source, .. } => {
                source.is_canceled()
            }
            _ => false,
        }
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
