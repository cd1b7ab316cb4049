//! Configuration
//!
//! Plain serde structs with defaults for every field, so a partial JSON
//! document (or none at all) yields a working setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How outbound changes are turned into wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every change is sent right away as a single-key `update`.
    Update,
    /// Changes accumulate and go out as one `patch` per flush.
    Patch,
}

/// Wire codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    Json,
    Msgpack,
}

/// Settings for one [`SyncChannel`](crate::sync::SyncChannel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncMode,
    /// Flush period for [`SyncMode::Patch`], in milliseconds.
    pub patch_interval_ms: u64,
    pub codec: CodecKind,
    /// Keep the authority in `Syncing` until the replica acks `init`.
    pub require_init_ack: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Update,
            patch_interval_ms: 16,
            codec: CodecKind::Json,
            require_init_ack: false,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn patch_interval(&self) -> Duration {
        Duration::from_millis(self.patch_interval_ms.max(1))
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_init_ack(mut self, required: bool) -> Self {
        self.require_init_ack = required;
        self
    }
}

/// Settings for a [`Pruner`](crate::state::Pruner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrunerConfig {
    /// Time between background passes, in milliseconds.
    pub interval_ms: u64,
    /// Entries untouched for longer than this are evicted, in milliseconds.
    pub max_age_ms: u64,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_age_ms: 30 * 60_000,
        }
    }
}

impl PrunerConfig {
    pub fn new(interval: Duration, max_age: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            max_age_ms: u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config =
            SyncConfig::from_json_str(r#"{"mode":"patch","codec":"msgpack","patch_interval_ms":50}"#)
                .unwrap();
        assert_eq!(config.mode, SyncMode::Patch);
        assert_eq!(config.codec, CodecKind::Msgpack);
        assert_eq!(config.patch_interval(), Duration::from_millis(50));
        assert!(!config.require_init_ack);
    }

    #[test]
    fn pruner_config_durations() {
        let config = PrunerConfig::from_json_str(r#"{"max_age_ms":1500}"#).unwrap();
        assert_eq!(config.max_age(), Duration::from_millis(1500));
        assert_eq!(config.interval(), Duration::from_secs(60));
    }

    #[test]
    fn huge_durations_saturate() {
        let config = PrunerConfig::new(Duration::from_secs(1), Duration::MAX);
        assert_eq!(config.max_age_ms, u64::MAX);
        assert_eq!(config.interval_ms, 1_000);
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(SyncConfig::from_json_str(r#"{"mode":"broadcast"}"#).is_err());
    }
}
