//! Archive entity types.
//!
//! Every persisted record carries `userId`, the owning tenant. Field names are
//! camelCase on the wire so blobs written by earlier clients stay readable.
//! Fields this version does not know about are kept in `extra` and written back
//! untouched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title used when a tenant has never customized their circle.
pub const DEFAULT_CIRCLE_TITLE: &str = "Family Circle";

fn default_circle_title() -> String {
    DEFAULT_CIRCLE_TITLE.to_string()
}

/// Deserializers for the loosely typed scalars earlier clients wrote:
/// numeric ids and timestamps, and `null` where a string belongs.
pub(crate) mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    fn scalar<E: Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(E::custom(format!("expected a string, found {}", other))),
        }
    }

    /// String, number, or bool as text. `null` reads as empty.
    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(scalar::<D::Error>(Value::deserialize(deserializer)?)?.unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        scalar(Value::deserialize(deserializer)?)
    }

    /// Array of scalars. `null` reads as empty and `null` entries are dropped.
    pub fn string_list<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(s) = scalar::<D::Error>(item)? {
                        out.push(s);
                    }
                }
                Ok(out)
            }
            other => Err(D::Error::custom(format!("expected a list, found {}", other))),
        }
    }

    /// Present field, possibly `null`: `Some(None)` clears, absence stays `None`.
    pub fn present<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        opt_string(deserializer).map(Some)
    }

    pub fn circle_title<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(opt_string(deserializer)?.unwrap_or_else(super::default_circle_title))
    }
}

/// The signed-in identity supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }
}

// =============================================================================
// Record trait
// =============================================================================

/// Common surface of tenant-owned, id-addressed records.
pub trait ArchiveRecord: Clone + Serialize {
    fn id(&self) -> &str;

    /// Owning tenant id (`userId` on the wire).
    fn owner_id(&self) -> &str;

    fn set_owner_id(&mut self, owner: &str);
}

macro_rules! impl_archive_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ArchiveRecord for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn owner_id(&self) -> &str {
                    &self.user_id
                }

                fn set_owner_id(&mut self, owner: &str) {
                    self.user_id = owner.to_string();
                }
            }
        )+
    };
}

impl_archive_record!(Profile, FamilyTree, CirclePost);

// =============================================================================
// Profiles
// =============================================================================

/// A dated event in a person's life.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A free-form remembrance attached to a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A photo, scan, or recording linked to a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub url: String,
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    pub media_type: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A person in the archive.
///
/// Relationship ids point at other profiles of the same tenant. They are not
/// checked on write; a dangling id is simply ignored by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
    pub spouse_ids: Vec<String>,
    pub timeline: Vec<TimelineEntry>,
    pub memories: Vec<Memory>,
    pub media: Vec<MediaItem>,
    pub banner_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            parent_ids: Vec::new(),
            child_ids: Vec::new(),
            spouse_ids: Vec::new(),
            timeline: Vec::new(),
            memories: Vec::new(),
            media: Vec::new(),
            banner_url: String::new(),
            extra: Map::new(),
        }
    }
}

// =============================================================================
// Family trees
// =============================================================================

/// A named family tree. Its layout payload is opaque to the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyTree {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(flatten)]
    pub structure: Map<String, Value>,
}

impl FamilyTree {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            structure: Map::new(),
        }
    }
}

// =============================================================================
// Circle feed
// =============================================================================

/// A post in the tenant's family circle feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CirclePost {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    pub user_id: String,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_profile_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub body: String,
    /// RFC 3339 for posts composed here; earlier clients stored epoch millis,
    /// which read back as their decimal text.
    #[serde(default, deserialize_with = "lenient::string")]
    pub created_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CirclePost {
    /// Build a fresh post the way the feed composer does: random id, now stamp.
    pub fn compose(user_id: &str, author_profile_id: Option<&str>, body: &str) -> Self {
        Self {
            id: format!("post-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            author_profile_id: author_profile_id.map(str::to_string),
            body: body.trim().to_string(),
            created_at: Utc::now().to_rfc3339(),
            extra: Map::new(),
        }
    }
}

/// Partial update for a post. `id` and `userId` are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CirclePostPatch {
    /// `Some(None)` clears the author.
    #[serde(default, deserialize_with = "lenient::present")]
    pub author_profile_id: Option<Option<String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CirclePostPatch {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.author_profile_id.is_none()
            && self.body.is_none()
            && self.created_at.is_none()
            && self.extra.is_empty()
    }

    /// Shallow merge: every present field replaces the post's value.
    pub fn apply(&self, post: &mut CirclePost) {
        if let Some(author) = &self.author_profile_id {
            post.author_profile_id = author.clone();
        }
        if let Some(body) = &self.body {
            post.body = body.clone();
        }
        if let Some(created_at) = &self.created_at {
            post.created_at = created_at.clone();
        }
        for (field, value) in &self.extra {
            if field == "id" || field == "userId" {
                continue;
            }
            post.extra.insert(field.clone(), value.clone());
        }
    }
}

/// Per-tenant circle header settings. One record per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleSettings {
    pub user_id: String,
    #[serde(default = "default_circle_title", deserialize_with = "lenient::circle_title")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub banner_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CircleSettings {
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: default_circle_title(),
            banner_url: String::new(),
            extra: Map::new(),
        }
    }

    /// True when the record carries nothing beyond the synthesized defaults.
    pub fn is_default(&self) -> bool {
        self.title == DEFAULT_CIRCLE_TITLE && self.banner_url.is_empty() && self.extra.is_empty()
    }
}
