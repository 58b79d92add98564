//! Error types for the archive's storage and configuration layers
//!
//! Storage errors are classified by how the store reacts to them:
//! - Capacity: the medium's quota rejected the write (triggers the tree retry)
//! - Io / Serialize: the write never reached the medium in a usable form
//!
//! None of these cross the public store boundary. The store logs them and
//! records them in its `PersistReport`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a persistence medium or while preparing a blob for it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing '{key}': {needed} bytes needed, limit {limit}")]
    CapacityExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    #[error("IO error on '{key}': {message}")]
    Io { key: String, message: String },

    #[error("Failed to serialize '{key}': {message}")]
    Serialize { key: String, message: String },
}

impl StorageError {
    /// Returns true if the medium rejected the write for lack of space
    pub fn is_capacity(&self) -> bool {
        matches!(self, StorageError::CapacityExceeded { .. })
    }

    /// Storage key the failure is about
    pub fn key(&self) -> &str {
        match self {
            StorageError::CapacityExceeded { key, .. }
            | StorageError::Io { key, .. }
            | StorageError::Serialize { key, .. } => key,
        }
    }

    pub(crate) fn io(key: &str, err: std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors loading `ArchiveConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Serializable failure summary for diagnostics consumers
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFailure {
    pub key: String,
    pub message: String,
    pub capacity: bool,
}

impl From<&StorageError> for StorageFailure {
    fn from(err: &StorageError) -> Self {
        StorageFailure {
            key: err.key().to_string(),
            message: err.to_string(),
            capacity: err.is_capacity(),
        }
    }
}
