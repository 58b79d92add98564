//! Client-resident family archive.
//!
//! Profiles, family trees, and circle posts for many tenants share four slots
//! of a bounded key-value medium. `store::ArchiveStore` keeps one tenant's
//! slice in memory and merges it back into the shared slots on every change.

pub mod codec;
pub mod config;
pub mod error;
pub mod medium;
pub mod state;
pub mod store;
pub mod types;

pub use config::{ArchiveConfig, StorageKeys};
pub use error::{ConfigError, StorageError};
pub use medium::{FileMedium, MemoryMedium, PersistenceMedium};
pub use state::{ArchiveState, CircleSummary};
pub use store::{ArchiveStore, PersistReport, PersistStatus, Reactions};
pub use types::{CirclePost, CirclePostPatch, CircleSettings, FamilyTree, Profile, User};
