//! Configuration for the update protocol.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OTA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ota/config.toml
//!   3. ~/.config/ota/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    pub window: WindowConfig,
    pub chunk: ChunkConfig,
    pub ack: AckConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Receive window budget in bytes. Window size in chunks is
    /// `bytes / chunk_size`.
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Smallest chunk size accepted in a Start request.
    pub min_size: usize,
    /// Largest chunk size accepted in a Start request.
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    /// Send an ack after this many unacknowledged chunks.
    pub batch: u32,
    /// Send an ack once no chunk arrived for this long.
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Cancel the update when no chunk arrives for this long.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum interval between progress log lines.
    pub interval_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            chunk: ChunkConfig::default(),
            ack: AckConfig::default(),
            transfer: TransferConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { bytes: 16 * 1024 }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_size: 32,
            max_size: 1024,
        }
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            batch: 2,
            delay_ms: 100,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl AckConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ChunkConfig {
    /// Whether `size` is an acceptable chunk size.
    pub fn accepts(&self, size: usize) -> bool {
        (self.min_size..=self.max_size).contains(&size) && size % 4 == 0
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OtaConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            OtaConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path: `$OTA_CONFIG`, else `ota/config.toml` under the
    /// XDG config home (`~/.config` when unset).
    pub fn file_path() -> PathBuf {
        if let Some(path) = std::env::var_os("OTA_CONFIG") {
            return PathBuf::from(path);
        }
        let config_home = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_default();
        config_home.join("ota").join("config.toml")
    }

    /// Reject combinations the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk = &self.chunk;
        if chunk.min_size == 0 || chunk.min_size > chunk.max_size {
            return Err(ConfigError::Invalid(format!(
                "chunk size range {}..={} is empty",
                chunk.min_size, chunk.max_size
            )));
        }
        if chunk.min_size % 4 != 0 || chunk.max_size % 4 != 0 {
            return Err(ConfigError::Invalid(
                "chunk size bounds must be multiples of 4".into(),
            ));
        }
        if self.window.bytes < chunk.max_size {
            return Err(ConfigError::Invalid(format!(
                "window of {} bytes cannot hold a {}-byte chunk",
                self.window.bytes, chunk.max_size
            )));
        }
        if self.ack.batch == 0 {
            return Err(ConfigError::Invalid("ack batch must be non-zero".into()));
        }
        if self.transfer.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transfer timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply OTA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        override_from_env("OTA_WINDOW__BYTES", &mut self.window.bytes);
        override_from_env("OTA_CHUNK__MIN_SIZE", &mut self.chunk.min_size);
        override_from_env("OTA_CHUNK__MAX_SIZE", &mut self.chunk.max_size);
        override_from_env("OTA_ACK__BATCH", &mut self.ack.batch);
        override_from_env("OTA_ACK__DELAY_MS", &mut self.ack.delay_ms);
        override_from_env("OTA_TRANSFER__TIMEOUT_MS", &mut self.transfer.timeout_ms);
        override_from_env("OTA_LOG__INTERVAL_MS", &mut self.log.interval_ms);
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
