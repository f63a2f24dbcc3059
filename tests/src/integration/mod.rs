//! # End-to-End Scenarios
//!
//! Cross-crate flows: storages assembled by the factory, resolved through the real
//! channel provider, and outgoing webhooks delivered to a local HTTP endpoint.

pub mod scenarios;
pub mod webhook;
