//! Application configuration loaded from TOML.

use crate::session::types::WeightUnit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default interval between background sync drain passes, in seconds.
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 30;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote backend settings
    pub backend: BackendConfig,
    /// Background sync settings
    pub sync: SyncSettings,
    /// Audio cue settings
    pub audio: AudioSettings,
    /// Unit used for new sets with no history to seed from
    pub default_unit: WeightUnit,
}

/// Remote backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the session API
    pub base_url: String,
    /// API key sent with every request
    pub api_key: String,
}

/// Background sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between background drain passes
    pub drain_interval_secs: u64,
}

/// Audio cue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Whether cues play at all
    pub enabled: bool,
    /// Playback volume (0.0 - 1.0)
    pub volume: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            sync: SyncSettings::default(),
            audio: AudioSettings::default(),
            default_unit: WeightUnit::Kg,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.repforge.io/v1".to_string(),
            api_key: String::new(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.8,
        }
    }
}

impl AppConfig {
    /// Default config file location.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "repforge", "repforge")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the given path, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the given path, creating parent directories.
    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}

/// Errors from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform config directory could be determined
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Filesystem error
    #[error("IO error: {0}")]
    IoError(String),

    /// Malformed TOML
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Serialization failed
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
}
