//! # DSPS Types
//!
//! Domain types shared by every DSPS crate.
//!
//! ## Contents
//!
//! - **Identifiers**: `ChannelId`, `SubscriberId`, `MessageId` (validated against
//!   `^[0-9a-z][0-9a-z_-]{0,62}$`), `StorageId`, `JwtJti`, `JwtExp`.
//! - **Messaging values**: `Message`, `MessageLocator`, `SubscriberLocator`, `AckHandle`.
//! - **Errors**: `StorageError` with stable codes used for policy decisions.
//! - **Cancellation**: `Context` carries a cancellation token and an optional deadline
//!   into every storage operation.
//! - **Capabilities**: the `Storage` trait and its optional `PubSubStorage` / `JwtStorage`
//!   capabilities, plus the `Channel` / `ChannelProvider` seam.
//!
//! ```text
//!   caller ──► Storage ──as_pubsub()──► PubSubStorage
//!                 │
//!                 └──as_jwt()─────► JwtStorage
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod channel;
pub mod clock;
pub mod config;
pub mod context;
pub mod duration;
pub mod errors;
pub mod ids;
pub mod jwt;
pub mod message;
pub mod storage;
pub mod template;

pub use channel::{Channel, ChannelProvider, SharedChannel};
pub use clock::{RealSystemClock, StubSystemClock, SystemClock};
pub use config::ConfigError;
pub use context::{CancelCause, Context, LockCanceled};
pub use errors::{BoxError, StorageError};
pub use ids::{ChannelId, IdError, MessageId, StorageId, SubscriberId};
pub use jwt::{JwtExp, JwtJti};
pub use message::{AckHandle, Message, MessageLocator, SubscriberLocator};
pub use storage::{FetchResult, JwtStorage, PubSubStorage, Storage};
pub use template::{TemplateEnv, TemplateError, TemplateString};
