//! Immutable archive snapshots and their derived selectors.
//!
//! A snapshot is cheap to clone: each collection sits behind its own `Arc`, and
//! building the next snapshot only replaces the collections that changed.
//! Consumers can compare collections with `Arc::ptr_eq` to skip work when
//! nothing moved.
//!
//! Selector results (active profile, selected tree, tree under view) are
//! resolved when a snapshot is built from a changed collection or pointer and
//! carried over untouched otherwise.

use std::sync::Arc;

use serde::Serialize;

use crate::types::{
    ArchiveRecord, CirclePost, CircleSettings, FamilyTree, Profile, DEFAULT_CIRCLE_TITLE,
};

/// Position of the record whose id matches `pointer`.
fn resolve<T: ArchiveRecord>(records: &[T], pointer: Option<&str>) -> Option<usize> {
    let id = pointer?;
    records.iter().position(|r| r.id() == id)
}

#[derive(Debug, Clone)]
pub struct ArchiveState {
    profiles: Arc<Vec<Profile>>,
    family_trees: Arc<Vec<FamilyTree>>,
    circle_posts: Arc<Vec<CirclePost>>,
    circle_settings: Arc<CircleSettings>,
    active_profile_id: Option<String>,
    selected_tree_id: Option<String>,
    tree_view_id: Option<String>,
    active_profile: Option<usize>,
    selected_tree: Option<usize>,
    tree_for_view: Option<usize>,
}

impl ArchiveState {
    /// Empty archive with default circle settings for `tenant`.
    pub fn empty(tenant: &str) -> Self {
        Self::loaded(Vec::new(), Vec::new(), Vec::new(), CircleSettings::default_for(tenant))
    }

    /// Snapshot freshly read from storage. Pointers start unset.
    pub fn loaded(
        profiles: Vec<Profile>,
        family_trees: Vec<FamilyTree>,
        circle_posts: Vec<CirclePost>,
        circle_settings: CircleSettings,
    ) -> Self {
        Self {
            profiles: Arc::new(profiles),
            family_trees: Arc::new(family_trees),
            circle_posts: Arc::new(circle_posts),
            circle_settings: Arc::new(circle_settings),
            active_profile_id: None,
            selected_tree_id: None,
            tree_view_id: None,
            active_profile: None,
            selected_tree: None,
            tree_for_view: None,
        }
    }

    // -------------------------------------------------------------------------
    // Collections
    // -------------------------------------------------------------------------

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn family_trees(&self) -> &[FamilyTree] {
        &self.family_trees
    }

    /// Posts, newest first.
    pub fn circle_posts(&self) -> &[CirclePost] {
        &self.circle_posts
    }

    pub fn circle_settings(&self) -> &CircleSettings {
        &self.circle_settings
    }

    pub fn shared_profiles(&self) -> Arc<Vec<Profile>> {
        Arc::clone(&self.profiles)
    }

    pub fn shared_family_trees(&self) -> Arc<Vec<FamilyTree>> {
        Arc::clone(&self.family_trees)
    }

    pub fn shared_circle_posts(&self) -> Arc<Vec<CirclePost>> {
        Arc::clone(&self.circle_posts)
    }

    pub fn shared_circle_settings(&self) -> Arc<CircleSettings> {
        Arc::clone(&self.circle_settings)
    }

    // -------------------------------------------------------------------------
    // Pointers and selectors
    // -------------------------------------------------------------------------

    pub fn active_profile_id(&self) -> Option<&str> {
        self.active_profile_id.as_deref()
    }

    pub fn selected_tree_id(&self) -> Option<&str> {
        self.selected_tree_id.as_deref()
    }

    pub fn tree_view_id(&self) -> Option<&str> {
        self.tree_view_id.as_deref()
    }

    /// Profile the pointer names, or `None` when unset or dangling.
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile.and_then(|i| self.profiles.get(i))
    }

    pub fn selected_tree(&self) -> Option<&FamilyTree> {
        self.selected_tree.and_then(|i| self.family_trees.get(i))
    }

    pub fn selected_tree_for_view(&self) -> Option<&FamilyTree> {
        self.tree_for_view.and_then(|i| self.family_trees.get(i))
    }

    /// Header numbers for the circle feed.
    pub fn circle_summary(&self) -> CircleSummary {
        let title = if self.circle_settings.title.is_empty() {
            DEFAULT_CIRCLE_TITLE.to_string()
        } else {
            self.circle_settings.title.clone()
        };

        CircleSummary {
            title,
            banner_url: self.circle_settings.banner_url.clone(),
            member_count: self.profiles.len(),
            post_count: self.circle_posts.len(),
        }
    }

    // -------------------------------------------------------------------------
    // Builders (crate-internal; the store is the only writer)
    // -------------------------------------------------------------------------

    pub(crate) fn with_profiles(mut self, profiles: Vec<Profile>) -> Self {
        self.active_profile = resolve(&profiles, self.active_profile_id.as_deref());
        self.profiles = Arc::new(profiles);
        self
    }

    pub(crate) fn with_family_trees(mut self, family_trees: Vec<FamilyTree>) -> Self {
        self.selected_tree = resolve(&family_trees, self.selected_tree_id.as_deref());
        self.tree_for_view = resolve(&family_trees, self.tree_view_id.as_deref());
        self.family_trees = Arc::new(family_trees);
        self
    }

    pub(crate) fn with_circle_posts(mut self, circle_posts: Vec<CirclePost>) -> Self {
        self.circle_posts = Arc::new(circle_posts);
        self
    }

    pub(crate) fn with_circle_settings(mut self, circle_settings: CircleSettings) -> Self {
        self.circle_settings = Arc::new(circle_settings);
        self
    }

    pub(crate) fn with_active_profile_id(mut self, id: Option<String>) -> Self {
        self.active_profile = resolve(&self.profiles, id.as_deref());
        self.active_profile_id = id;
        self
    }

    pub(crate) fn with_selected_tree_id(mut self, id: Option<String>) -> Self {
        self.selected_tree = resolve(&self.family_trees, id.as_deref());
        self.selected_tree_id = id;
        self
    }

    pub(crate) fn with_tree_view_id(mut self, id: Option<String>) -> Self {
        self.tree_for_view = resolve(&self.family_trees, id.as_deref());
        self.tree_view_id = id;
        self
    }
}

/// What the circle banner shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleSummary {
    pub title: String,
    pub banner_url: String,
    pub member_count: usize,
    pub post_count: usize,
}

impl CircleSummary {
    /// e.g. "1 member · 3 posts"
    pub fn label(&self) -> String {
        format!(
            "{} {} · {} {}",
            self.member_count,
            if self.member_count == 1 { "member" } else { "members" },
            self.post_count,
            if self.post_count == 1 { "post" } else { "posts" },
        )
    }
}
