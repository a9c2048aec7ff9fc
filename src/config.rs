//! Engine configuration and config-file location.
//!
//! Config lives in `<platform config dir>/clipline/clipline.json` unless
//! `--config-dir` overrides the directory. Missing file means defaults;
//! every field is optional in the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "clipline.json";
const APP_DIR: &str = "clipline";

/// How cache entries are keyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStrategy {
    /// One entry per (source, clip): independently pre-seeked handles per trim.
    #[default]
    PerClip,
    /// One entry per source file, shared by all clips that reference it.
    PerSource,
}

impl KeyStrategy {
    /// Pool size each strategy was tuned for.
    pub fn default_capacity(&self) -> usize {
        match self {
            KeyStrategy::PerClip => 3,
            KeyStrategy::PerSource => 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "CacheConfigFile")]
pub struct CacheConfig {
    pub key_strategy: KeyStrategy,
    /// Max Ready+Loading entries before LRU eviction
    pub capacity: usize,
    pub metadata_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    /// A failed key is not re-prepared by `acquire` for this long
    pub retry_backoff_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_strategy(KeyStrategy::default())
    }
}

/// On-disk form of [`CacheConfig`]: an omitted `capacity` follows the
/// chosen `key_strategy`.
#[derive(Deserialize)]
#[serde(default)]
struct CacheConfigFile {
    key_strategy: KeyStrategy,
    capacity: Option<usize>,
    metadata_timeout_ms: u64,
    seek_timeout_ms: u64,
    retry_backoff_ms: u64,
}

impl Default for CacheConfigFile {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            key_strategy: defaults.key_strategy,
            capacity: None,
            metadata_timeout_ms: defaults.metadata_timeout_ms,
            seek_timeout_ms: defaults.seek_timeout_ms,
            retry_backoff_ms: defaults.retry_backoff_ms,
        }
    }
}

impl From<CacheConfigFile> for CacheConfig {
    fn from(file: CacheConfigFile) -> Self {
        Self {
            key_strategy: file.key_strategy,
            capacity: file
                .capacity
                .unwrap_or_else(|| file.key_strategy.default_capacity()),
            metadata_timeout_ms: file.metadata_timeout_ms,
            seek_timeout_ms: file.seek_timeout_ms,
            retry_backoff_ms: file.retry_backoff_ms,
        }
    }
}

impl CacheConfig {
    pub fn for_strategy(key_strategy: KeyStrategy) -> Self {
        Self {
            key_strategy,
            capacity: key_strategy.default_capacity(),
            metadata_timeout_ms: 2000,
            seek_timeout_ms: 200,
            retry_backoff_ms: 1000,
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Resource within this many seconds of the clip out-point counts as finished
    pub end_epsilon: f64,
    /// Max allowed resource/clock divergence before an explicit seek-then-play
    pub drift_threshold: f64,
    /// How far ahead of the playhead the preloader prepares clips (seconds)
    pub preload_lookahead: f64,
    pub preload_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            end_epsilon: 0.05,
            drift_threshold: 0.1,
            preload_lookahead: 3.0,
            preload_interval_ms: 250,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub playback: PlaybackConfig,
    /// Preparation threads (0 = auto)
    pub workers: usize,
}

impl EngineConfig {
    /// Resolved worker count: 3/4 of CPUs, at least 1.
    pub fn worker_threads(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            (num_cpus::get() * 3 / 4).max(1)
        }
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("Config loaded: {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

/// Config directory: override if given, else platform dir, else cwd.
pub fn config_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    dirs_next::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Full path of a file inside the config directory.
pub fn config_file(name: &str, override_dir: Option<&Path>) -> PathBuf {
    config_dir(override_dir).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_capacities() {
        assert_eq!(CacheConfig::for_strategy(KeyStrategy::PerClip).capacity, 3);
        assert_eq!(CacheConfig::for_strategy(KeyStrategy::PerSource).capacity, 5);
        assert_eq!(CacheConfig::default().metadata_timeout(), Duration::from_secs(2));
        assert_eq!(CacheConfig::default().seek_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "cache": { "capacity": 7 }, "workers": 2 }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache.capacity, 7);
        assert_eq!(config.cache.key_strategy, KeyStrategy::PerClip);
        assert_eq!(config.playback, PlaybackConfig::default());
        assert_eq!(config.worker_threads(), 2);
    }

    #[test]
    fn capacity_follows_strategy_when_omitted() {
        let json = r#"{ "cache": { "key_strategy": "PerSource" } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache, CacheConfig::for_strategy(KeyStrategy::PerSource));
        assert_eq!(config.cache.capacity, 5);

        let json = r#"{ "cache": { "key_strategy": "PerSource", "capacity": 2 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache.capacity, 2);
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join(format!("clipline-missing-{}.json", std::process::id()));
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("clipline-cfg-{}", std::process::id()));
        let path = config_file(CONFIG_FILE, Some(&dir));
        let mut config = EngineConfig::default();
        config.playback.preload_lookahead = 1.5;
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn override_dir_wins() {
        let dir = Path::new("/tmp/custom");
        assert_eq!(config_file(CONFIG_FILE, Some(dir)), dir.join(CONFIG_FILE));
    }

    #[test]
    fn auto_workers_at_least_one() {
        assert!(EngineConfig::default().worker_threads() >= 1);
    }
}
