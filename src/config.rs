//! Replicator configuration.
//!
//! A single struct constructed once at instance creation and threaded
//! explicitly through the replicator and its background tasks — no
//! process-wide globals are re-read on hot paths (see `SegmentSelection`
//! below for the one behavior that historically was a global flag).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rule used by the read cursor to pick a segment for a target log index.
///
/// The original implementation always picks the first segment whose
/// `start_index >= offset`, which skips the segment actually containing
/// `offset` whenever `offset` falls strictly inside it. `Corrected` fixes
/// this; `Legacy` reproduces the historical (buggy) behavior for
/// compatibility testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentSelection {
    Legacy,
    Corrected,
}

impl Default for SegmentSelection {
    fn default() -> Self {
        SegmentSelection::Corrected
    }
}

/// Configuration for a [`crate::replicator::Replicator`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatorConfig {
    /// Rollover threshold, in mebibytes. The core's only tunable named by
    /// the original design.
    pub segment_size_mib: u32,

    /// Interval at which the Pusher / Applier background loop wakes up
    /// even without an explicit `Notify`.
    #[serde(with = "duration_secs")]
    pub push_tick: Duration,

    /// Per-RPC call timeout.
    #[serde(with = "duration_secs")]
    pub rpc_timeout: Duration,

    /// TCP connect timeout for the RPC client.
    #[serde(with = "duration_secs")]
    pub rpc_connect_timeout: Duration,

    /// How long `Stop()` waits for the background task to drain.
    #[serde(with = "duration_millis")]
    pub stop_drain_timeout: Duration,

    /// Selection rule used by the read cursor when rolling to a segment.
    pub segment_selection: SegmentSelection,

    /// Starting log index recovered when the segment index is empty.
    pub initial_log_offset: u64,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            segment_size_mib: 1,
            push_tick: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(12),
            rpc_connect_timeout: Duration::from_secs(3),
            stop_drain_timeout: Duration::from_secs(1),
            segment_selection: SegmentSelection::Corrected,
            initial_log_offset: 0,
        }
    }
}

impl ReplicatorConfig {
    pub fn segment_size_bytes(&self) -> u64 {
        self.segment_size_mib as u64 * 1024 * 1024
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ReplicatorConfig =
            serde_json::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Ok(config)
    }
}

/// Paths derived from a replicator's root directory.
#[derive(Debug, Clone)]
pub struct InstancePaths {
    pub root: PathBuf,
    pub meta_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl InstancePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            meta_dir: root.join("meta"),
            log_dir: root.join("logs"),
            root,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config file: {err}"),
            ConfigError::Parse(msg) => write!(f, "failed to parse config file: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        value.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(de)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReplicatorConfig::default();
        assert_eq!(config.segment_size_mib, 1);
        assert_eq!(config.segment_size_bytes(), 1024 * 1024);
        assert_eq!(config.segment_selection, SegmentSelection::Corrected);
        assert_eq!(config.initial_log_offset, 0);
    }

    #[test]
    fn json_round_trip() {
        let config = ReplicatorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: ReplicatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.segment_size_mib, config.segment_size_mib);
        assert_eq!(decoded.push_tick, config.push_tick);
    }

    #[test]
    fn load_json_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("replicator.json");
        std::fs::write(
            &path,
            r#"{"segment_size_mib": 64, "segment_selection": "Legacy"}"#,
        )
        .unwrap();

        let config = ReplicatorConfig::load_json(&path).unwrap();
        assert_eq!(config.segment_size_mib, 64);
        assert_eq!(config.segment_selection, SegmentSelection::Legacy);
        // Fields not present in the file keep their defaults.
        assert_eq!(config.rpc_timeout, Duration::from_secs(12));
    }

    #[test]
    fn instance_paths_derive_meta_and_log_dirs() {
        let paths = InstancePaths::new("/var/lib/binlog/table0");
        assert_eq!(paths.meta_dir, Path::new("/var/lib/binlog/table0/meta"));
        assert_eq!(paths.log_dir, Path::new("/var/lib/binlog/table0/logs"));
    }
}
