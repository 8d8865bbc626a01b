//! Host configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelGonePolicy;

/// Tunables for the panel host. Every field has a default, so an empty
/// file (or no file at all) yields a working configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Window for an acknowledged send to be confirmed, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Window for a new surface's boot acknowledgment, in milliseconds.
    pub boot_timeout_ms: u64,
    /// Per-direction envelope channel capacity.
    pub channel_capacity: usize,
    /// What a send does when the surface is already gone.
    pub on_channel_gone: ChannelGonePolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 4000,
            boot_timeout_ms: 4000,
            channel_capacity: 64,
            on_channel_gone: ChannelGonePolicy::Ignore,
        }
    }
}

impl HostConfig {
    /// Load config from a TOML file path. Returns `Ok(None)` if the file
    /// doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }
}

/// Errors that can occur when loading or saving config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write config {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(toml::ser::Error),
}
