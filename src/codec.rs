//! Cross-tenant blob codec.
//!
//! Each storage key holds one JSON array shared by every tenant. Reads keep the
//! raw `serde_json::Value` records so that writes can splice one tenant's
//! records in and out without ever decoding (or reshaping) anyone else's.
//!
//! Decoding into typed entities goes through a tolerant stored shape first:
//! 1. Parse the blob; a missing key or unparseable content is an empty array
//! 2. Keep records whose `userId` matches the tenant
//! 3. Decode each record on its own, skipping the ones that do not fit
//!
//! A tenant's record that does not decode is still the tenant's data. Writes
//! leave it in place unless the caller asks for a purge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::medium::PersistenceMedium;
use crate::types::{
    lenient, CirclePost, CircleSettings, FamilyTree, MediaItem, Memory, Profile, TimelineEntry,
};

/// Wire field naming the owning tenant.
pub const OWNER_FIELD: &str = "userId";

/// Owning tenant of a raw record, if it has one.
pub fn record_owner(record: &Value) -> Option<&str> {
    record.get(OWNER_FIELD).and_then(Value::as_str)
}

/// Read the whole cross-tenant array stored at `key`.
///
/// Never fails: absent keys, invalid JSON, and non-array payloads all read as
/// an empty collection.
pub fn read_blob(medium: &dyn PersistenceMedium, key: &str) -> Vec<Value> {
    let content = match medium.get(key) {
        Some(c) => c,
        None => return Vec::new(),
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(records)) => records,
        Ok(other) => {
            log::warn!(
                "Archive codec: '{}' holds {} instead of an array, treating as empty",
                key,
                json_kind(&other)
            );
            Vec::new()
        }
        Err(e) => {
            log::warn!("Archive codec: '{}' is not valid JSON ({}), treating as empty", key, e);
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Decode
// =============================================================================

/// Decode one stored record into its canonical entity.
pub trait Decode: Sized {
    fn decode(raw: Value) -> Result<Self, serde_json::Error>;
}

impl Decode for FamilyTree {
    fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }
}

impl Decode for CirclePost {
    fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }
}

impl Decode for CircleSettings {
    fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }
}

impl Decode for Profile {
    fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        let stored: StoredProfile = serde_json::from_value(raw)?;
        Ok(stored.into())
    }
}

/// Profile as older or partial clients may have written it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredProfile {
    #[serde(deserialize_with = "lenient::string")]
    id: String,
    user_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    name: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    parent_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    child_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    spouse_ids: Vec<String>,
    #[serde(default)]
    timeline: Option<Vec<TimelineEntry>>,
    #[serde(default)]
    memories: Option<Vec<Memory>>,
    #[serde(default)]
    media: Option<Vec<MediaItem>>,
    #[serde(default, deserialize_with = "lenient::string")]
    banner_url: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<StoredProfile> for Profile {
    fn from(stored: StoredProfile) -> Self {
        Profile {
            id: stored.id,
            user_id: stored.user_id,
            name: stored.name,
            parent_ids: stored.parent_ids,
            child_ids: stored.child_ids,
            spouse_ids: stored.spouse_ids,
            timeline: stored.timeline.unwrap_or_default(),
            memories: stored.memories.unwrap_or_default(),
            media: stored.media.unwrap_or_default(),
            banner_url: stored.banner_url,
            extra: stored.extra,
        }
    }
}

/// Decode the records `tenant` owns, preserving stored order.
pub fn decode_owned<T: Decode>(records: Vec<Value>, key: &str, tenant: &str) -> Vec<T> {
    let mut skipped = 0usize;
    let decoded: Vec<T> = records
        .into_iter()
        .filter(|record| record_owner(record) == Some(tenant))
        .filter_map(|record| match T::decode(record) {
            Ok(entity) => Some(entity),
            Err(e) => {
                skipped += 1;
                log::debug!("Archive codec: skipping record in '{}': {}", key, e);
                None
            }
        })
        .collect();

    if skipped > 0 {
        log::warn!(
            "Archive codec: {} undecodable record(s) for tenant {} in '{}' left in storage",
            skipped,
            tenant,
            key
        );
    }
    decoded
}

/// Read and decode the tenant's slice of the collection at `key`.
pub fn load_owned<T: Decode>(medium: &dyn PersistenceMedium, key: &str, tenant: &str) -> Vec<T> {
    decode_owned(read_blob(medium, key), key, tenant)
}

/// First settings record owned by `tenant`, or the synthesized default.
pub fn load_settings(medium: &dyn PersistenceMedium, key: &str, tenant: &str) -> CircleSettings {
    decode_owned::<CircleSettings>(read_blob(medium, key), key, tenant)
        .into_iter()
        .next()
        .unwrap_or_else(|| CircleSettings::default_for(tenant))
}

// =============================================================================
// Merge-by-replacement
// =============================================================================

/// What a write does with tenant-owned records that do not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreadable {
    /// Leave them in the blob. Load never materialized them, so no in-memory
    /// state stands in for them.
    Keep,
    /// Remove them along with the rest of the tenant's records.
    Purge,
}

/// True when `record` decodes as `T`.
pub fn is_readable<T: Decode>(record: &Value) -> bool {
    T::decode(record.clone()).is_ok()
}

/// Drop the records `tenant` owns from `existing` and append `records`.
///
/// Records of other tenants keep their original position and raw shape, as do
/// the tenant's undecodable records under `Unreadable::Keep`.
pub fn merge_owned<T: Decode + Serialize>(
    mut existing: Vec<Value>,
    tenant: &str,
    records: &[T],
    unreadable: Unreadable,
) -> Result<Vec<Value>, serde_json::Error> {
    existing.retain(|record| {
        record_owner(record) != Some(tenant)
            || (unreadable == Unreadable::Keep && !is_readable::<T>(record))
    });
    for record in records {
        existing.push(serde_json::to_value(record)?);
    }
    Ok(existing)
}

/// Re-read `key`, splice the tenant's records in, and serialize the result.
pub fn merged_blob<T: Decode + Serialize>(
    medium: &dyn PersistenceMedium,
    key: &str,
    tenant: &str,
    records: &[T],
    unreadable: Unreadable,
) -> Result<String, StorageError> {
    let to_storage_error = |e: serde_json::Error| StorageError::Serialize {
        key: key.to_string(),
        message: e.to_string(),
    };
    let merged = merge_owned(read_blob(medium, key), tenant, records, unreadable)
        .map_err(to_storage_error)?;
    serde_json::to_string(&merged).map_err(to_storage_error)
}

/// Merge-by-replacement write of one collection.
pub fn write_owned<T: Decode + Serialize>(
    medium: &dyn PersistenceMedium,
    key: &str,
    tenant: &str,
    records: &[T],
    unreadable: Unreadable,
) -> Result<(), StorageError> {
    let blob = merged_blob(medium, key, tenant, records, unreadable)?;
    medium.set(key, &blob)
}

/// Per-tenant record counts in a blob, for diagnostics.
pub fn owner_counts(records: &[Value]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for record in records {
        let owner = record_owner(record).unwrap_or("").to_string();
        match counts.iter_mut().find(|(o, _)| *o == owner) {
            Some((_, n)) => *n += 1,
            None => counts.push((owner, 1)),
        }
    }
    counts
}
