// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of released roots kept alive in the release buffer.
pub const DEFAULT_RELEASE_BUFFER_SIZE: usize = 10;

/// Error type for config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Tunables of a [`crate::Store`] and its publish queue.
///
/// Every field has a default, so a partial (or empty) JSON object is a valid
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Released roots kept alive before they become collectable.
    pub gc_release_buffer_size: usize,
    /// Age after which a retained root's data counts as stale, in
    /// milliseconds. `None` disables expiration.
    pub query_cache_expiration_ms: Option<u64>,
    /// Report invariant slips (e.g. no-op runs) as errors instead of warnings.
    pub instrumented: bool,
    /// Whether garbage collection runs at all.
    pub gc_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_release_buffer_size: DEFAULT_RELEASE_BUFFER_SIZE,
            query_cache_expiration_ms: None,
            instrumented: false,
            gc_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Parses a JSON configuration.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the configuration as pretty JSON.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
