//! Configuration types for TideFS
//!
//! The surface is deliberately small: where the managed namespace is
//! mounted, where the engine finds its own configuration, and how much
//! memory the file cache may hold.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a TideFS environment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Directory prefix of the managed namespace. Paths under it are routed
    /// to the engine; everything else falls back to POSIX.
    pub mount_dir: PathBuf,
    /// Engine configuration file, handed to the engine verbatim.
    pub engine_conf: Option<PathBuf>,
    /// File cache configuration.
    pub cache: CacheConfig,
    /// How long `start` waits for the engine to report ready before
    /// surfacing `EngineNotReady`.
    pub ready_timeout_ms: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            mount_dir: PathBuf::from("/mnt/tidefs"),
            engine_conf: None,
            cache: CacheConfig::default(),
            ready_timeout_ms: 10_000,
        }
    }
}

impl EnvConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("parse {}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.mount_dir.as_os_str().is_empty() {
            return Err(Error::config("mount_dir must not be empty"));
        }
        self.cache.validate()
    }

    /// Readiness wait as a `Duration`
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// File cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum resident bytes across all cache entries. Exceeding it
    /// triggers eviction (flush for write entries, window drop for reads).
    pub capacity_bytes: u64,
    /// Size of the buffered window a read entry keeps resident.
    pub read_window_bytes: usize,
    /// A write entry flushes to the engine once its buffer reaches this.
    pub writeback_threshold_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024,       // 64 MB
            read_window_bytes: 256 * 1024,          // 256 KB
            writeback_threshold_bytes: 1024 * 1024, // 1 MB
        }
    }
}

impl CacheConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes == 0 {
            return Err(Error::config("cache capacity_bytes must be non-zero"));
        }
        if self.read_window_bytes == 0 {
            return Err(Error::config("cache read_window_bytes must be non-zero"));
        }
        if self.writeback_threshold_bytes == 0 {
            return Err(Error::config(
                "cache writeback_threshold_bytes must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EnvConfig::default();
        assert_eq!(config.cache.capacity_bytes, 64 * 1024 * 1024);
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = EnvConfig {
            mount_dir: PathBuf::from("/db"),
            cache: CacheConfig {
                capacity_bytes: 1024,
                ..CacheConfig::default()
            },
            ..EnvConfig::default()
        };
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = EnvConfig::load(file.path()).unwrap();
        assert_eq!(loaded.mount_dir, PathBuf::from("/db"));
        assert_eq!(loaded.cache.capacity_bytes, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EnvConfig {
            cache: CacheConfig {
                capacity_bytes: 0,
                ..CacheConfig::default()
            },
            ..EnvConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
