//! The archive store: one active tenant's collections over a shared medium.
//!
//! Mutations never touch storage. They build the next `ArchiveState` snapshot,
//! return it, and mark a Persist pass as pending. Tenant changes mark a Load
//! pass as pending. `run_reactions()` is the scheduler step that performs the
//! pending work, Load before Persist.
//!
//! Persist is merge-by-replacement on every collection: re-read the
//! cross-tenant blob, drop the tenant's old records, append the current ones.
//! The medium has no per-record addressing, so this is the only way to write
//! one tenant's slice without disturbing the others.

use std::sync::Arc;

use serde::Serialize;

use crate::codec::{self, Unreadable};
use crate::config::StorageKeys;
use crate::error::{StorageError, StorageFailure};
use crate::medium::PersistenceMedium;
use crate::state::ArchiveState;
use crate::types::{
    ArchiveRecord, CirclePost, CirclePostPatch, CircleSettings, FamilyTree, Profile, User,
};

/// The four persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Profiles,
    FamilyTrees,
    CirclePosts,
    CircleSettings,
}

/// Result of one collection write within a Persist pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionWrite {
    pub collection: Collection,
    pub key: String,
    pub failure: Option<StorageFailure>,
}

impl CollectionWrite {
    pub fn saved(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistStatus {
    /// Every collection was written.
    Saved,
    /// Some writes failed, but family trees reached storage.
    Degraded,
    /// Family trees could not be written even in isolation.
    Unsaved,
}

/// Diagnostic record of a Persist pass. Never returned as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    pub tenant: String,
    pub writes: Vec<CollectionWrite>,
    /// Outcome of the isolated family-tree retry, if one ran.
    pub tree_retry: Option<Result<(), StorageFailure>>,
    pub status: PersistStatus,
}

impl PersistReport {
    pub fn write_for(&self, collection: Collection) -> Option<&CollectionWrite> {
        self.writes.iter().find(|w| w.collection == collection)
    }
}

/// What a `run_reactions()` step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    /// Tenant whose collections were loaded.
    pub loaded: Option<String>,
    pub persisted: Option<PersistReport>,
}

impl Reactions {
    pub fn is_empty(&self) -> bool {
        self.loaded.is_none() && self.persisted.is_none()
    }
}

#[derive(Debug, Default)]
struct Pending {
    load: bool,
    persist: bool,
    /// The next Persist also removes the tenant's undecodable records.
    purge: bool,
}

pub struct ArchiveStore {
    medium: Arc<dyn PersistenceMedium>,
    keys: StorageKeys,
    tenant: Option<String>,
    state: Arc<ArchiveState>,
    pending: Pending,
    last_persist: Option<PersistReport>,
}

impl ArchiveStore {
    pub fn new(medium: Arc<dyn PersistenceMedium>, keys: StorageKeys) -> Self {
        Self {
            medium,
            keys,
            tenant: None,
            state: Arc::new(ArchiveState::empty("")),
            pending: Pending::default(),
            last_persist: None,
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<ArchiveState> {
        Arc::clone(&self.state)
    }

    pub fn active_tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn has_pending_reactions(&self) -> bool {
        self.pending.load || self.pending.persist
    }

    /// Report of the most recent Persist pass.
    pub fn last_persist_report(&self) -> Option<&PersistReport> {
        self.last_persist.as_ref()
    }

    // =========================================================================
    // Tenant identity
    // =========================================================================

    /// React to the session's identity. Only a change of id matters.
    ///
    /// A new tenant schedules a Load. Signing out keeps the in-memory
    /// collections and simply stops persisting.
    ///
    /// A Persist still pending for the outgoing tenant runs here, inline,
    /// rather than in the next `run_reactions()`: by then the active tenant
    /// has changed and the Load would have replaced the collections.
    pub fn observe_user(&mut self, user: Option<&User>) {
        let next = user.map(|u| u.id.as_str());
        if next == self.tenant.as_deref() {
            return;
        }

        if self.pending.persist && !self.pending.load {
            if let Some(tenant) = self.tenant.clone() {
                log::debug!("Archive: flushing pending persist for {} before tenant switch", tenant);
                self.persist(&tenant);
            }
        }
        self.pending.persist = false;
        self.pending.purge = false;

        match next {
            Some(id) => {
                log::info!("Archive: tenant changed to {}", id);
                self.tenant = Some(id.to_string());
                self.pending.load = true;
            }
            None => {
                log::info!("Archive: tenant signed out, persistence paused");
                self.tenant = None;
                self.pending.load = false;
            }
        }
    }

    // =========================================================================
    // Scheduler step
    // =========================================================================

    /// Run pending reactions: Load first, then Persist.
    pub fn run_reactions(&mut self) -> Reactions {
        let mut reactions = Reactions::default();

        if std::mem::take(&mut self.pending.load) {
            if let Some(tenant) = self.tenant.clone() {
                self.load(&tenant);
                // Freshly loaded state matches storage; nothing to write back.
                self.pending.persist = false;
                self.pending.purge = false;
                reactions.loaded = Some(tenant);
            }
        }

        if std::mem::take(&mut self.pending.persist) {
            match self.tenant.clone() {
                Some(tenant) => reactions.persisted = Some(self.persist(&tenant)),
                None => log::debug!("Archive: no active tenant, skipping persist"),
            }
        }

        reactions
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Replace in-memory state with `tenant`'s slice of every collection.
    ///
    /// Reads only. A corrupt blob for one collection leaves that collection
    /// empty and does not affect the others.
    fn load(&mut self, tenant: &str) {
        let medium = self.medium.as_ref();
        let profiles: Vec<Profile> = codec::load_owned(medium, &self.keys.profiles, tenant);
        let family_trees: Vec<FamilyTree> = codec::load_owned(medium, &self.keys.family_trees, tenant);
        let circle_posts: Vec<CirclePost> = codec::load_owned(medium, &self.keys.circle_posts, tenant);
        let circle_settings = codec::load_settings(medium, &self.keys.circle_settings, tenant);

        log::info!(
            "Archive load: tenant {} has {} profiles, {} trees, {} posts",
            tenant,
            profiles.len(),
            family_trees.len(),
            circle_posts.len()
        );

        self.state = Arc::new(ArchiveState::loaded(
            profiles,
            family_trees,
            circle_posts,
            circle_settings,
        ));
    }

    // =========================================================================
    // Persist
    // =========================================================================

    /// Merge-by-replacement write of all four collections for `tenant`.
    ///
    /// Each write is attempted regardless of the others. If anything failed
    /// and family trees were among the failures, the tree write is retried once
    /// on its own. Failures end up in the report and the log, never the caller.
    ///
    /// The tenant's records that Load could not decode stay in storage, except
    /// on the pass following `clear_all`.
    fn persist(&mut self, tenant: &str) -> PersistReport {
        let unreadable = if std::mem::take(&mut self.pending.purge) {
            Unreadable::Purge
        } else {
            Unreadable::Keep
        };
        let medium = self.medium.as_ref();
        let state = Arc::clone(&self.state);

        // Settings equal to the default are written as no record at all. Load
        // synthesizes the same default from absence, so round-trips hold, and
        // a cleared tenant leaves nothing behind in the settings key.
        let settings: Vec<CircleSettings> = if state.circle_settings().is_default() {
            Vec::new()
        } else {
            vec![state.circle_settings().clone()]
        };

        let results: [(Collection, &str, Result<(), StorageError>); 4] = [
            (
                Collection::Profiles,
                self.keys.profiles.as_str(),
                codec::write_owned(
                    medium,
                    &self.keys.profiles,
                    tenant,
                    state.profiles(),
                    unreadable,
                ),
            ),
            (
                Collection::FamilyTrees,
                self.keys.family_trees.as_str(),
                codec::write_owned(
                    medium,
                    &self.keys.family_trees,
                    tenant,
                    state.family_trees(),
                    unreadable,
                ),
            ),
            (
                Collection::CirclePosts,
                self.keys.circle_posts.as_str(),
                codec::write_owned(
                    medium,
                    &self.keys.circle_posts,
                    tenant,
                    state.circle_posts(),
                    unreadable,
                ),
            ),
            (
                Collection::CircleSettings,
                self.keys.circle_settings.as_str(),
                codec::write_owned(
                    medium,
                    &self.keys.circle_settings,
                    tenant,
                    &settings,
                    unreadable,
                ),
            ),
        ];

        let writes: Vec<CollectionWrite> = results
            .iter()
            .map(|(collection, key, result)| CollectionWrite {
                collection: *collection,
                key: key.to_string(),
                failure: result.as_ref().err().map(StorageFailure::from),
            })
            .collect();

        let failed: Vec<&CollectionWrite> = writes.iter().filter(|w| !w.saved()).collect();
        if failed.is_empty() {
            log::debug!("Archive persist: tenant {} saved", tenant);
            let report = PersistReport {
                tenant: tenant.to_string(),
                writes,
                tree_retry: None,
                status: PersistStatus::Saved,
            };
            self.last_persist = Some(report.clone());
            return report;
        }

        for write in &failed {
            if let Some(failure) = &write.failure {
                log::error!(
                    "Archive persist: {:?} not saved for tenant {}, archive may not be fully saved: {}",
                    write.collection,
                    tenant,
                    failure.message
                );
            }
        }

        let trees_failed = failed.iter().any(|w| w.collection == Collection::FamilyTrees);
        let tree_retry = if trees_failed {
            let retry = codec::write_owned(
                medium,
                &self.keys.family_trees,
                tenant,
                state.family_trees(),
                unreadable,
            );
            match &retry {
                Ok(()) => {
                    log::warn!("Archive persist: family trees saved on isolated retry for {}", tenant)
                }
                Err(e) => {
                    log::error!("Archive persist: family tree retry failed for {}: {}", tenant, e)
                }
            }
            Some(retry.map_err(|e| StorageFailure::from(&e)))
        } else {
            None
        };

        let status = match &tree_retry {
            Some(Err(_)) => PersistStatus::Unsaved,
            _ => PersistStatus::Degraded,
        };

        let report = PersistReport {
            tenant: tenant.to_string(),
            writes,
            tree_retry,
            status,
        };
        self.last_persist = Some(report.clone());
        report
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Install `next` as the current snapshot and schedule a Persist.
    fn commit(&mut self, next: ArchiveState) -> Arc<ArchiveState> {
        self.state = Arc::new(next);
        self.pending.persist = true;
        Arc::clone(&self.state)
    }

    /// Install `next` without scheduling a Persist (pointer-only changes).
    fn commit_pointers(&mut self, next: ArchiveState) -> Arc<ArchiveState> {
        self.state = Arc::new(next);
        Arc::clone(&self.state)
    }

    fn next_state(&self) -> ArchiveState {
        self.state.as_ref().clone()
    }

    /// Records entering the store belong to the active tenant.
    fn claim<T: ArchiveRecord>(&self, record: &mut T) {
        if let Some(tenant) = &self.tenant {
            if record.owner_id() != tenant {
                record.set_owner_id(tenant);
            }
        }
    }

    /// First occurrence of each id wins.
    fn claim_all<T: ArchiveRecord>(&self, records: Vec<T>, what: &str) -> Vec<T> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(records.len());
        for mut record in records {
            if !seen.insert(record.id().to_string()) {
                log::warn!("Archive: dropping duplicate {} id {}", what, record.id());
                continue;
            }
            self.claim(&mut record);
            out.push(record);
        }
        out
    }

    // ---- circle posts -------------------------------------------------------

    /// Prepend a post; the feed stays newest first by construction.
    pub fn add_post(&mut self, mut post: CirclePost) -> Arc<ArchiveState> {
        self.claim(&mut post);
        let mut posts = Vec::with_capacity(self.state.circle_posts().len() + 1);
        posts.push(post);
        posts.extend(self.state.circle_posts().iter().cloned());
        let next = self.next_state().with_circle_posts(posts);
        self.commit(next)
    }

    /// Remove the post with `id`. Unknown ids change nothing.
    pub fn delete_post(&mut self, id: &str) -> Arc<ArchiveState> {
        if !self.state.circle_posts().iter().any(|p| p.id == id) {
            return self.state();
        }
        let posts: Vec<CirclePost> = self
            .state
            .circle_posts()
            .iter()
            .filter(|p| p.id != id)
            .cloned()
            .collect();
        let next = self.next_state().with_circle_posts(posts);
        self.commit(next)
    }

    /// Shallow-merge `patch` into the post with `id`. Unknown ids change nothing.
    pub fn update_post(&mut self, id: &str, patch: &CirclePostPatch) -> Arc<ArchiveState> {
        let index = match self.state.circle_posts().iter().position(|p| p.id == id) {
            Some(i) => i,
            None => return self.state(),
        };

        let mut updated = self.state.circle_posts()[index].clone();
        patch.apply(&mut updated);
        if updated == self.state.circle_posts()[index] {
            return self.state();
        }

        let mut posts = self.state.circle_posts().to_vec();
        posts[index] = updated;
        let next = self.next_state().with_circle_posts(posts);
        self.commit(next)
    }

    // ---- profiles -----------------------------------------------------------

    pub fn set_profiles(&mut self, profiles: Vec<Profile>) -> Arc<ArchiveState> {
        let profiles = self.claim_all(profiles, "profile");
        let next = self.next_state().with_profiles(profiles);
        self.commit(next)
    }

    /// Replace the profile with the same id, or append a new one.
    pub fn upsert_profile(&mut self, mut profile: Profile) -> Arc<ArchiveState> {
        let mut profiles = self.state.profiles().to_vec();
        match profiles.iter().position(|p| p.id == profile.id) {
            Some(i) => {
                // Ownership is fixed at creation.
                profile.user_id = profiles[i].user_id.clone();
                if profiles[i] == profile {
                    return self.state();
                }
                profiles[i] = profile;
            }
            None => {
                self.claim(&mut profile);
                profiles.push(profile);
            }
        }
        let next = self.next_state().with_profiles(profiles);
        self.commit(next)
    }

    pub fn delete_profile(&mut self, id: &str) -> Arc<ArchiveState> {
        if !self.state.profiles().iter().any(|p| p.id == id) {
            return self.state();
        }
        let profiles: Vec<Profile> = self
            .state
            .profiles()
            .iter()
            .filter(|p| p.id != id)
            .cloned()
            .collect();
        let next = self.next_state().with_profiles(profiles);
        self.commit(next)
    }

    // ---- family trees -------------------------------------------------------

    pub fn set_family_trees(&mut self, trees: Vec<FamilyTree>) -> Arc<ArchiveState> {
        let trees = self.claim_all(trees, "family tree");
        let next = self.next_state().with_family_trees(trees);
        self.commit(next)
    }

    /// Replace the tree with the same id, or append a new one.
    pub fn upsert_family_tree(&mut self, mut tree: FamilyTree) -> Arc<ArchiveState> {
        let mut trees = self.state.family_trees().to_vec();
        match trees.iter().position(|t| t.id == tree.id) {
            Some(i) => {
                tree.user_id = trees[i].user_id.clone();
                if trees[i] == tree {
                    return self.state();
                }
                trees[i] = tree;
            }
            None => {
                self.claim(&mut tree);
                trees.push(tree);
            }
        }
        let next = self.next_state().with_family_trees(trees);
        self.commit(next)
    }

    pub fn delete_family_tree(&mut self, id: &str) -> Arc<ArchiveState> {
        if !self.state.family_trees().iter().any(|t| t.id == id) {
            return self.state();
        }
        let trees: Vec<FamilyTree> = self
            .state
            .family_trees()
            .iter()
            .filter(|t| t.id != id)
            .cloned()
            .collect();
        let next = self.next_state().with_family_trees(trees);
        self.commit(next)
    }

    // ---- circle settings ----------------------------------------------------

    pub fn set_circle_settings(&mut self, mut settings: CircleSettings) -> Arc<ArchiveState> {
        if let Some(tenant) = &self.tenant {
            settings.user_id = tenant.clone();
        }
        if *self.state.circle_settings() == settings {
            return self.state();
        }
        let next = self.next_state().with_circle_settings(settings);
        self.commit(next)
    }

    pub fn set_circle_title(&mut self, title: &str) -> Arc<ArchiveState> {
        let mut settings = self.state.circle_settings().clone();
        settings.title = title.trim().to_string();
        self.set_circle_settings(settings)
    }

    /// Store the banner image URL (already converted by the caller).
    pub fn set_circle_banner(&mut self, banner_url: &str) -> Arc<ArchiveState> {
        let mut settings = self.state.circle_settings().clone();
        settings.banner_url = banner_url.to_string();
        self.set_circle_settings(settings)
    }

    // ---- selection pointers -------------------------------------------------

    pub fn set_active_profile_id(&mut self, id: Option<&str>) -> Arc<ArchiveState> {
        let next = self.next_state().with_active_profile_id(id.map(str::to_string));
        self.commit_pointers(next)
    }

    pub fn set_selected_tree_id(&mut self, id: Option<&str>) -> Arc<ArchiveState> {
        let next = self.next_state().with_selected_tree_id(id.map(str::to_string));
        self.commit_pointers(next)
    }

    pub fn set_tree_view_id(&mut self, id: Option<&str>) -> Arc<ArchiveState> {
        let next = self.next_state().with_tree_view_id(id.map(str::to_string));
        self.commit_pointers(next)
    }

    // ---- clear --------------------------------------------------------------

    /// Reset every collection and pointer for the active tenant.
    ///
    /// Storage is untouched here; the Persist pass this schedules removes the
    /// tenant's records from every key, undecodable ones included.
    pub fn clear_all(&mut self) -> Arc<ArchiveState> {
        let tenant = self.tenant.clone().unwrap_or_default();
        log::info!("Archive: clearing all collections for tenant {}", tenant);
        self.pending.purge = true;
        self.commit(ArchiveState::empty(&tenant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::testing::ScriptedMedium;
    use crate::medium::MemoryMedium;
    use serde_json::{json, Value};

    fn keys() -> StorageKeys {
        StorageKeys::default()
    }

    fn store_for(medium: Arc<dyn PersistenceMedium>, user: &str) -> ArchiveStore {
        let mut store = ArchiveStore::new(medium, keys());
        store.observe_user(Some(&User::new(user, user.to_uppercase())));
        store.run_reactions();
        store
    }

    fn blob(medium: &dyn PersistenceMedium, key: &str) -> Vec<Value> {
        codec::read_blob(medium, key)
    }

    fn post(id: &str, body: &str) -> CirclePost {
        CirclePost {
            id: id.to_string(),
            user_id: String::new(),
            author_profile_id: None,
            body: body.to_string(),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            extra: Default::default(),
        }
    }

    fn seed_two_tenants(medium: &MemoryMedium) {
        let k = keys();
        medium
            .set(
                &k.profiles,
                &json!([
                    {"id": "p1", "userId": "alice", "name": "Ada"},
                    {"id": "p9", "userId": "bob", "name": "Bea", "legacy": true}
                ])
                .to_string(),
            )
            .unwrap();
        medium
            .set(
                &k.family_trees,
                &json!([{"id": "t9", "userId": "bob", "name": "Bob's tree", "nodes": []}]).to_string(),
            )
            .unwrap();
        medium
            .set(
                &k.circle_posts,
                &json!([{"id": "x9", "userId": "bob", "body": "hi from bob", "createdAt": ""}]).to_string(),
            )
            .unwrap();
        medium
            .set(
                &k.circle_settings,
                &json!([{"userId": "bob", "title": "Bob's Circle", "bannerUrl": ""}]).to_string(),
            )
            .unwrap();
    }

    fn bob_records(medium: &dyn PersistenceMedium) -> Vec<Value> {
        keys()
            .all()
            .iter()
            .flat_map(|key| blob(medium, key))
            .filter(|r| codec::record_owner(r) == Some("bob"))
            .collect()
    }

    #[test]
    fn test_load_filters_to_tenant_and_normalizes() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);

        let store = store_for(medium, "alice");
        let state = store.state();
        assert_eq!(state.profiles().len(), 1);
        assert_eq!(state.profiles()[0].name, "Ada");
        assert!(state.profiles()[0].parent_ids.is_empty());
        assert!(state.family_trees().is_empty());
        assert!(state.circle_posts().is_empty());
    }

    #[test]
    fn test_default_settings_synthesized_for_new_tenant() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);

        let store = store_for(medium, "alice");
        let settings = store.state().circle_settings().clone();
        assert_eq!(settings.user_id, "alice");
        assert_eq!(settings.title, "Family Circle");
        assert_eq!(settings.banner_url, "");
    }

    #[test]
    fn test_load_performs_no_writes() {
        let medium = Arc::new(ScriptedMedium::new());
        let mut store = ArchiveStore::new(medium.clone(), keys());
        store.observe_user(Some(&User::new("alice", "Alice")));
        let reactions = store.run_reactions();

        assert_eq!(reactions.loaded.as_deref(), Some("alice"));
        assert!(reactions.persisted.is_none());
        assert!(medium.attempts().is_empty());
    }

    #[test]
    fn test_corrupt_blob_isolated_to_its_collection() {
        let medium = Arc::new(MemoryMedium::new());
        let k = keys();
        medium.set(&k.profiles, "]]] not json").unwrap();
        medium
            .set(&k.family_trees, &json!([{"id": "t1", "userId": "alice", "name": "Tree"}]).to_string())
            .unwrap();

        let store = store_for(medium, "alice");
        assert!(store.state().profiles().is_empty());
        assert_eq!(store.state().family_trees().len(), 1);
    }

    #[test]
    fn test_load_resets_pointers() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);
        let mut store = store_for(medium, "alice");
        store.set_active_profile_id(Some("p1"));
        assert!(store.state().active_profile().is_some());

        store.observe_user(Some(&User::new("bob", "Bob")));
        store.run_reactions();
        store.observe_user(Some(&User::new("alice", "Alice")));
        store.run_reactions();

        assert_eq!(store.state().active_profile_id(), None);
        assert!(store.state().active_profile().is_none());
    }

    #[test]
    fn test_same_user_id_does_not_reload() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.add_post(post("a1", "first"));
        store.run_reactions();

        // Renamed session object, same id
        store.observe_user(Some(&User::new("alice", "Alice Renamed")));
        assert!(!store.has_pending_reactions());
        assert_eq!(store.state().circle_posts().len(), 1);
    }

    #[test]
    fn test_sign_out_keeps_state_and_stops_persisting() {
        let medium = Arc::new(ScriptedMedium::new());
        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("a1", "first"));
        store.run_reactions();
        medium.clear_attempts();

        store.observe_user(None);
        assert_eq!(store.active_tenant(), None);
        assert_eq!(store.state().circle_posts().len(), 1);

        store.add_post(post("a2", "offline"));
        let reactions = store.run_reactions();
        assert!(reactions.persisted.is_none());
        assert!(medium.attempts().is_empty());
    }

    #[test]
    fn test_pending_persist_flushed_before_switch() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("a1", "unsaved"));

        // Switch without running reactions in between
        store.observe_user(Some(&User::new("bob", "Bob")));
        store.run_reactions();

        let posts = blob(medium.as_ref(), &keys().circle_posts);
        assert_eq!(posts.len(), 1);
        assert_eq!(codec::record_owner(&posts[0]), Some("alice"));
        assert!(store.state().circle_posts().is_empty());
    }

    #[test]
    fn test_tenant_isolation() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);
        let before = bob_records(medium.as_ref());

        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("a1", "hello"));
        store.upsert_profile(Profile::new("p2", "alice", "Byron"));
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));
        store.set_circle_title("Alice's Circle");
        store.run_reactions();
        store.delete_profile("p1");
        store.run_reactions();

        assert_eq!(bob_records(medium.as_ref()), before);
    }

    #[test]
    fn test_persist_idempotent() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);
        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("a1", "hello"));
        store.set_circle_banner("https://example.com/banner.jpg");
        store.run_reactions();

        let snapshot: Vec<Option<String>> = keys().all().iter().map(|k| medium.get(k)).collect();

        // Same state again
        store.pending.persist = true;
        let reactions = store.run_reactions();
        assert_eq!(reactions.persisted.map(|r| r.status), Some(PersistStatus::Saved));

        let again: Vec<Option<String>> = keys().all().iter().map(|k| medium.get(k)).collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn test_round_trip_through_tenant_switch() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);
        let mut store = store_for(medium.clone(), "alice");

        let mut profile = Profile::new("p2", "alice", "Byron");
        profile.child_ids.push("p1".to_string());
        store.upsert_profile(profile);
        let mut tree = FamilyTree::new("t1", "alice", "Lovelace");
        tree.structure.insert("rootId".to_string(), json!("p1"));
        store.upsert_family_tree(tree);
        store.add_post(post("a1", "first"));
        store.add_post(post("a2", "second"));
        store.set_circle_title("Alice's Circle");
        store.run_reactions();
        let saved = store.state();

        store.observe_user(Some(&User::new("bob", "Bob")));
        store.run_reactions();
        assert_eq!(store.state().circle_settings().title, "Bob's Circle");

        store.observe_user(Some(&User::new("alice", "Alice")));
        store.run_reactions();
        let reloaded = store.state();

        assert_eq!(reloaded.profiles(), saved.profiles());
        assert_eq!(reloaded.family_trees(), saved.family_trees());
        assert_eq!(reloaded.circle_posts(), saved.circle_posts());
        assert_eq!(reloaded.circle_settings(), saved.circle_settings());
    }

    #[test]
    fn test_loose_records_survive_unrelated_edit() {
        let medium = Arc::new(MemoryMedium::new());
        let k = keys();
        medium
            .set(
                &k.circle_posts,
                &json!([
                    {"id": "a1", "userId": "alice", "body": "old client", "createdAt": 1700000000000u64},
                    {"id": "a2", "userId": "alice", "body": null, "createdAt": null},
                    {"userId": "alice", "body": "written without an id"},
                    {"id": "x9", "userId": "bob", "body": "hi from bob"}
                ])
                .to_string(),
            )
            .unwrap();
        medium
            .set(
                &k.profiles,
                &json!([{
                    "id": "p1",
                    "userId": "alice",
                    "name": "Ada",
                    "timeline": [{"id": 7, "date": "1815-12-10", "title": "Born"}]
                }])
                .to_string(),
            )
            .unwrap();
        medium
            .set(
                &k.circle_settings,
                &json!([{"userId": "alice", "title": "Ada's", "bannerUrl": "", "theme": "sepia"}])
                    .to_string(),
            )
            .unwrap();

        let mut store = store_for(medium.clone(), "alice");
        assert_eq!(store.state().circle_posts().len(), 2);
        assert_eq!(store.state().circle_posts()[0].created_at, "1700000000000");
        assert_eq!(store.state().profiles().len(), 1);
        assert_eq!(store.state().profiles()[0].timeline[0].id, "7");

        store.set_circle_title("Alice");
        store.run_reactions();

        let posts: Vec<Value> = blob(medium.as_ref(), &k.circle_posts)
            .into_iter()
            .filter(|r| codec::record_owner(r) == Some("alice"))
            .collect();
        assert_eq!(posts.len(), 3);
        assert!(posts.contains(&json!({"userId": "alice", "body": "written without an id"})));
        assert!(posts.iter().any(|r| r["id"] == "a1" && r["body"] == "old client"));
        assert!(posts.iter().any(|r| r["id"] == "a2"));

        let profiles = blob(medium.as_ref(), &k.profiles);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["timeline"][0]["title"], "Born");

        let settings = blob(medium.as_ref(), &k.circle_settings);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0]["title"], "Alice");
        assert_eq!(settings[0]["theme"], "sepia");
    }

    #[test]
    fn test_add_post_prepends() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.add_post(post("p1", "one"));
        let state = store.add_post(post("p2", "two"));

        let ids: Vec<&str> = state.circle_posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
        assert!(state.circle_posts().iter().all(|p| p.user_id == "alice"));
    }

    #[test]
    fn test_delete_and_update_missing_are_noops() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.add_post(post("p1", "one"));
        store.run_reactions();
        let before = store.state();

        let after_delete = store.delete_post("missing");
        let after_update = store.update_post("missing", &CirclePostPatch::body("x"));

        assert!(Arc::ptr_eq(&before, &after_delete));
        assert!(Arc::ptr_eq(&before, &after_update));
        assert!(!store.has_pending_reactions());
    }

    #[test]
    fn test_update_post_merges_fields() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.add_post(post("p1", "one"));
        store.add_post(post("p2", "two"));

        let state = store.update_post("p1", &CirclePostPatch::body("one, edited"));
        assert_eq!(state.circle_posts()[1].body, "one, edited");
        assert_eq!(state.circle_posts()[1].created_at, "2026-01-01T00:00:00+00:00");
        assert_eq!(state.circle_posts()[0].body, "two");
    }

    #[test]
    fn test_delete_post_removes_match() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.add_post(post("p1", "one"));
        store.add_post(post("p2", "two"));

        let state = store.delete_post("p1");
        let ids: Vec<&str> = state.circle_posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2"]);
    }

    #[test]
    fn test_clear_then_persist_deletes_only_tenant_records() {
        let medium = Arc::new(MemoryMedium::new());
        seed_two_tenants(&medium);
        let bob_before = bob_records(medium.as_ref());

        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("a1", "hello"));
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));
        store.set_circle_title("Alice's Circle");
        store.set_active_profile_id(Some("p1"));
        store.run_reactions();

        let mut posts = blob(medium.as_ref(), &keys().circle_posts);
        posts.push(json!({"userId": "alice", "body": "written without an id"}));
        medium
            .set(&keys().circle_posts, &Value::Array(posts).to_string())
            .unwrap();

        let state = store.clear_all();
        assert!(state.profiles().is_empty());
        assert_eq!(state.active_profile_id(), None);
        assert_eq!(*state.circle_settings(), CircleSettings::default_for("alice"));

        // clear_all itself does not write
        assert!(blob(medium.as_ref(), &keys().circle_posts)
            .iter()
            .any(|r| codec::record_owner(r) == Some("alice")));

        store.run_reactions();
        for key in keys().all() {
            assert!(
                !blob(medium.as_ref(), key)
                    .iter()
                    .any(|r| codec::record_owner(r) == Some("alice")),
                "alice still present in {}",
                key
            );
        }
        assert_eq!(bob_records(medium.as_ref()), bob_before);
    }

    #[test]
    fn test_quota_fallback_saves_trees_alone() {
        let medium = Arc::new(ScriptedMedium::new());
        let k = keys();
        let mut store = store_for(medium.clone(), "alice");
        store.upsert_profile(Profile::new("p1", "alice", "Ada"));
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));
        store.add_post(post("a1", "hello"));
        store.set_circle_title("Alice's Circle");

        for key in k.all() {
            medium.reject(key, 1);
        }
        medium.clear_attempts();
        let report = store.run_reactions().persisted.expect("persist ran");

        assert_eq!(report.status, PersistStatus::Degraded);
        assert_eq!(report.tree_retry, Some(Ok(())));
        assert!(report.writes.iter().all(|w| !w.saved()));
        assert_eq!(
            medium.attempts(),
            vec![
                k.profiles.clone(),
                k.family_trees.clone(),
                k.circle_posts.clone(),
                k.circle_settings.clone(),
                k.family_trees.clone(),
            ]
        );

        let trees = blob(medium.as_ref(), &k.family_trees);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0]["id"], "t1");
        assert!(medium.get(&k.profiles).is_none());
        assert!(medium.get(&k.circle_posts).is_none());
        assert_eq!(store.last_persist_report(), Some(&report));
    }

    #[test]
    fn test_one_failed_write_does_not_block_others() {
        let medium = Arc::new(ScriptedMedium::new());
        let k = keys();
        let mut store = store_for(medium.clone(), "alice");
        store.upsert_profile(Profile::new("p1", "alice", "Ada"));
        store.add_post(post("a1", "hello"));

        medium.reject(&k.profiles, 1);
        let report = store.run_reactions().persisted.expect("persist ran");

        assert_eq!(report.status, PersistStatus::Degraded);
        assert_eq!(report.tree_retry, None);
        assert!(!report.write_for(Collection::Profiles).unwrap().saved());
        assert!(report.write_for(Collection::CirclePosts).unwrap().saved());
        assert_eq!(blob(medium.as_ref(), &k.circle_posts).len(), 1);
    }

    #[test]
    fn test_quota_fallback_failure_is_swallowed() {
        let medium = Arc::new(ScriptedMedium::new());
        let k = keys();
        let mut store = store_for(medium.clone(), "alice");
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));

        medium.reject(&k.family_trees, 2);
        let report = store.run_reactions().persisted.expect("persist ran");

        assert_eq!(report.status, PersistStatus::Unsaved);
        assert!(matches!(report.tree_retry, Some(Err(_))));
        assert!(medium.get(&k.family_trees).is_none());
        // The store keeps working
        assert_eq!(store.state().family_trees().len(), 1);
    }

    #[test]
    fn test_quota_medium_degrades_instead_of_failing() {
        let k = keys();
        // Room for a small tree blob but not for a large profile blob
        let medium = Arc::new(MemoryMedium::with_quota(400));
        let mut store = store_for(medium.clone(), "alice");

        let mut big = Profile::new("p1", "alice", "Ada");
        big.banner_url = "x".repeat(1_000);
        store.upsert_profile(big);
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));
        let report = store.run_reactions().persisted.expect("persist ran");

        assert_eq!(report.status, PersistStatus::Degraded);
        assert!(!report.write_for(Collection::Profiles).unwrap().saved());
        assert_eq!(blob(medium.as_ref(), &k.family_trees).len(), 1);
    }

    #[test]
    fn test_pointer_changes_do_not_persist() {
        let medium = Arc::new(ScriptedMedium::new());
        let mut store = store_for(medium.clone(), "alice");
        store.upsert_family_tree(FamilyTree::new("t1", "alice", "Lovelace"));
        store.run_reactions();
        medium.clear_attempts();

        let state = store.set_selected_tree_id(Some("t1"));
        store.set_tree_view_id(Some("t1"));
        assert_eq!(state.selected_tree().map(|t| t.id.as_str()), Some("t1"));
        assert!(store.run_reactions().is_empty());
        assert!(medium.attempts().is_empty());
    }

    #[test]
    fn test_selectors_stable_across_unrelated_mutations() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.upsert_profile(Profile::new("p1", "alice", "Ada"));
        let before = store.set_active_profile_id(Some("p1"));
        let after = store.add_post(post("a1", "hello"));

        assert!(Arc::ptr_eq(&before.shared_profiles(), &after.shared_profiles()));
        assert!(std::ptr::eq(
            before.active_profile().unwrap(),
            after.active_profile().unwrap()
        ));
    }

    #[test]
    fn test_deleted_profile_leaves_dangling_pointer() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        store.upsert_profile(Profile::new("p1", "alice", "Ada"));
        store.set_active_profile_id(Some("p1"));

        let state = store.delete_profile("p1");
        assert_eq!(state.active_profile_id(), Some("p1"));
        assert!(state.active_profile().is_none());
    }

    #[test]
    fn test_upsert_keeps_owner_and_claims_new_records() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");

        store.upsert_profile(Profile::new("p1", "mallory", "Ada"));
        assert_eq!(store.state().profiles()[0].user_id, "alice");

        let mut renamed = Profile::new("p1", "mallory", "Ada Lovelace");
        renamed.spouse_ids.push("p7".to_string());
        let state = store.upsert_profile(renamed);
        assert_eq!(state.profiles().len(), 1);
        assert_eq!(state.profiles()[0].user_id, "alice");
        assert_eq!(state.profiles()[0].name, "Ada Lovelace");
    }

    #[test]
    fn test_set_family_trees_drops_duplicate_ids() {
        let medium = Arc::new(MemoryMedium::new());
        let mut store = store_for(medium, "alice");
        let state = store.set_family_trees(vec![
            FamilyTree::new("t1", "alice", "First"),
            FamilyTree::new("t1", "alice", "Second"),
            FamilyTree::new("t2", "alice", "Other"),
        ]);
        let names: Vec<&str> = state.family_trees().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Other"]);
    }

    #[test]
    fn test_same_id_across_tenants_is_independent() {
        let medium = Arc::new(MemoryMedium::new());
        let k = keys();
        medium
            .set(&k.circle_posts, &json!([{"id": "shared", "userId": "bob", "body": "bob's"}]).to_string())
            .unwrap();

        let mut store = store_for(medium.clone(), "alice");
        store.add_post(post("shared", "alice's"));
        store.run_reactions();

        let posts = blob(medium.as_ref(), &k.circle_posts);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0]["body"], "bob's");
        assert_eq!(posts[1]["body"], "alice's");
    }
}
