//! Persistence media: the bounded key-value stores the archive writes through.
//!
//! - `MemoryMedium`: in-process map, used by tests and embedders that own
//!   their own durability.
//! - `FileMedium`: one JSON file per key under a directory, replaced atomically.
//!
//! Both enforce a byte quota across all keys, the way a browser's local storage
//! does, and report rejections as `StorageError::CapacityExceeded`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StorageError;

/// Opaque string-keyed storage with bounded capacity.
///
/// No transactional guarantees exist across keys. Implementations must be
/// shareable between stores in one process.
pub trait PersistenceMedium: Send + Sync {
    /// Current value for `key`, or `None` when absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;

    /// Replace the value for `key`. Fails when the write would exceed capacity.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

// =============================================================================
// In-memory medium
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryMedium {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    /// Unbounded medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium that rejects writes once keys plus values exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently held across all keys.
    pub fn usage_bytes(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PersistenceMedium for MemoryMedium {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();

        if let Some(limit) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum();
            let needed = others + entry_size(key, value);
            if needed > limit {
                return Err(StorageError::CapacityExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// =============================================================================
// File-backed medium
// =============================================================================

/// Stores each key as `{dir}/{key}.json`.
#[derive(Debug)]
pub struct FileMedium {
    dir: PathBuf,
    quota_bytes: Option<usize>,
    write_lock: Mutex<()>,
}

/// Keep alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
fn file_name_for_key(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", safe)
}

impl FileMedium {
    /// Open (creating if needed) a medium rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: Option<usize>) -> Result<Self, StorageError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .map_err(|e| StorageError::io(&dir.display().to_string(), e))?;
        }
        Ok(Self {
            dir,
            quota_bytes,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for_key(key))
    }

    /// Bytes held by every key file except `exclude`.
    fn usage_excluding(&self, exclude: &Path) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };

        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json") && path != exclude)
            .filter_map(|path| path.metadata().ok())
            .map(|meta| meta.len() as usize)
            .sum()
    }

    /// Bytes currently held across all key files.
    pub fn usage_bytes(&self) -> usize {
        self.usage_excluding(Path::new(""))
    }
}

impl PersistenceMedium for FileMedium {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("File medium: failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let path = self.path_for(key);

        if let Some(limit) = self.quota_bytes {
            let needed = self.usage_excluding(&path) + value.len();
            if needed > limit {
                return Err(StorageError::CapacityExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| StorageError::io(key, e))?;
        tmp.write_all(value.as_bytes())
            .map_err(|e| StorageError::io(key, e))?;
        tmp.persist(&path).map_err(|e| StorageError::io(key, e.error))?;

        Ok(())
    }
}

// =============================================================================
// Test support
// =============================================================================
