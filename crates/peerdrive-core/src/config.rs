//! Configuration module for Peerdrive.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the sync core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

/// Synchronization and transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Size of one transfer chunk in bytes.
    pub chunk_size: u64,
    /// Folder under which read-write shares from other users materialize.
    pub shared_rw_dir: String,
    /// Folder under which read-only shares from other users materialize.
    pub shared_ro_dir: String,
}

/// Bounded-wait settings for the protocol phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Seconds to wait for all offer replies.
    pub offer_timeout_secs: u64,
    /// Seconds to wait for a propagation phase (push, delete, move).
    pub exchange_timeout_secs: u64,
    /// Seconds to wait for a whole pull transfer to complete.
    pub demand_timeout_secs: u64,
}

impl ProtocolConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn demand_timeout(&self) -> Duration {
        Duration::from_secs(self.demand_timeout_secs)
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            shared_rw_dir: "Shared with me (read-write)".to_string(),
            shared_ro_dir: "Shared with me (read-only)".to_string(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            offer_timeout_secs: 30,
            exchange_timeout_secs: 60,
            demand_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.chunk_size, 1024 * 1024);
        assert_eq!(config.protocol.demand_timeout_secs, 120);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_timeout_conversion() {
        let config = ProtocolConfig::default();
        assert_eq!(config.offer_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "sync:\n  chunk_size: 4096\n  shared_rw_dir: rw\n  shared_ro_dir: ro\n\
             protocol:\n  offer_timeout_secs: 5\n  exchange_timeout_secs: 10\n  demand_timeout_secs: 20\n\
             logging:\n  level: debug\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync.chunk_size, 4096);
        assert_eq!(config.protocol.offer_timeout_secs, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/does/not/exist.yaml"));
        assert_eq!(config.sync.chunk_size, 1024 * 1024);
    }
}
