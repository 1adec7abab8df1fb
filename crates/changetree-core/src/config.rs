// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Build configuration and its storage port.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;

/// Key under which [`BuildConfig`] is persisted in a [`ConfigStore`].
pub const CONFIG_KEY: &str = "changetree";

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Tunables for tree builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Record loads slower than this are logged with their originating log.
    pub slow_load_threshold_ms: u64,
    /// Snapshots with no data or at most this many blocks count as empty in
    /// the breakpoint tie-break ladder.
    pub empty_snapshot_max_blocks: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            slow_load_threshold_ms: 100,
            empty_snapshot_max_blocks: 1,
        }
    }
}

impl BuildConfig {
    /// Slow-load threshold as a `Duration`.
    pub fn slow_load_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_load_threshold_ms)
    }

    /// Loads the config from `store`, falling back to defaults when the key
    /// is missing or empty.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound` and JSON errors.
    pub fn load<S: ConfigStore + ?Sized>(store: &S) -> Result<Self, ConfigError> {
        match store.load_raw(CONFIG_KEY) {
            Ok(bytes) if bytes.is_empty() => Ok(Self::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(ConfigError::NotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Persists the config as pretty JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialisation and store failures.
    pub fn save<S: ConfigStore + ?Sized>(&self, store: &S) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self)?;
        store.save_raw(CONFIG_KEY, &data)
    }
}

/// Per-build options handed to every build entry point.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Tunables.
    pub config: BuildConfig,
    /// Cancellation token polled around every record store call.
    pub cancel: CancelToken,
}

impl BuildOptions {
    /// Options with the given config and a fresh token.
    pub fn with_config(config: BuildConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }
}
