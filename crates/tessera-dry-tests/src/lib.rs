// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Tessera crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`records`] - Record and source builders
//! - [`operations`] - Query, selector and payload helpers
//! - [`subscribers`] - Recording subscribers and call counters
//! - [`live`] - Externally driven live state
//! - [`logging`] - One-shot `tracing` subscriber for tests

pub mod live;
pub mod logging;
pub mod operations;
pub mod records;
pub mod subscribers;

pub use live::PollingLiveSource;
pub use logging::init_test_logging;
pub use operations::{fragment_selector, payload, query, query_with_variables};
pub use records::{user, RecordBuilder, SourceBuilder};
pub use subscribers::{CallCounter, RecordingSubscriber};
