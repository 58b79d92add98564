//! Archive configuration (`~/.family-archive/config.json`).
//!
//! Every field has a serde default, so a missing file or a partial file both
//! produce a usable config. Only a file that exists but does not parse is an
//! error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Browser local-storage budget most clients get per origin.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Storage keys for the four persisted collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageKeys {
    #[serde(default = "default_profiles_key")]
    pub profiles: String,
    #[serde(default = "default_family_trees_key")]
    pub family_trees: String,
    #[serde(default = "default_circle_posts_key")]
    pub circle_posts: String,
    #[serde(default = "default_circle_settings_key")]
    pub circle_settings: String,
}

fn default_profiles_key() -> String {
    "heritage_profiles".to_string()
}

fn default_family_trees_key() -> String {
    "heritage_family_trees".to_string()
}

fn default_circle_posts_key() -> String {
    "heritage_circle_posts".to_string()
}

fn default_circle_settings_key() -> String {
    "heritage_circle_settings".to_string()
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            profiles: default_profiles_key(),
            family_trees: default_family_trees_key(),
            circle_posts: default_circle_posts_key(),
            circle_settings: default_circle_settings_key(),
        }
    }
}

impl StorageKeys {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.profiles,
            &self.family_trees,
            &self.circle_posts,
            &self.circle_settings,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveConfig {
    #[serde(default)]
    pub keys: StorageKeys,
    /// Byte budget for the file-backed medium. `null` disables the quota.
    #[serde(default = "default_quota")]
    pub quota_bytes: Option<usize>,
    /// Directory for the file-backed medium. Defaults to `~/.family-archive/storage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
}

fn default_quota() -> Option<usize> {
    Some(DEFAULT_QUOTA_BYTES)
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            keys: StorageKeys::default(),
            quota_bytes: default_quota(),
            storage_dir: None,
        }
    }
}

impl ArchiveConfig {
    /// Resolve where the file-backed medium lives.
    pub fn resolve_storage_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(state_dir()?.join("storage")),
        }
    }

    /// Reject configs that would make collections share a slot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let keys = self.keys.all();
        for (i, key) in keys.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid("storage keys must not be empty".into()));
            }
            if keys[i + 1..].contains(key) {
                return Err(ConfigError::Invalid(format!(
                    "storage key '{}' is used by more than one collection",
                    key
                )));
            }
        }
        if self.quota_bytes == Some(0) {
            return Err(ConfigError::Invalid("quotaBytes must be positive".into()));
        }
        Ok(())
    }
}

/// The archive's state directory (`~/.family-archive`).
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".family-archive"))
}

/// Canonical config file path (`~/.family-archive/config.json`).
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(state_dir()?.join("config.json"))
}

/// Load configuration from the canonical path.
pub fn load_config() -> Result<ArchiveConfig, ConfigError> {
    load_config_from(&config_path()?)
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<ArchiveConfig, ConfigError> {
    if !path.exists() {
        log::debug!("Archive config: {} not found, using defaults", path.display());
        return Ok(ArchiveConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: ArchiveConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    config.validate()?;
    Ok(config)
}
