//! # DSPS Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── conformance/      # Behaviour shared by every storage engine
//! │   ├── onmemory.rs
//! │   ├── multiplex.rs  # factory-built storages (#root → multiplexer → children)
//! │   └── redis.rs      # needs DSPS_TEST_REDIS_SINGLE_NODE
//! │
//! └── integration/      # Cross-crate scenarios
//!     ├── scenarios.rs
//!     └── webhook.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p dsps-tests
//!
//! # With Redis
//! DSPS_TEST_REDIS_SINGLE_NODE=localhost:6379 cargo test -p dsps-tests
//!
//! # By category
//! cargo test -p dsps-tests conformance::
//! cargo test -p dsps-tests integration::
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod conformance;
pub mod integration;
