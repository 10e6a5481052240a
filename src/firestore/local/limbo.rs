use std::collections::{BTreeMap, BTreeSet};

use crate::firestore::model::DocumentKey;

use super::target_id_generator::TargetIdGenerator;
use super::view::{LimboDocumentChange, LimboDocumentChangeType};

/// Tracks a single document suspected of having been deleted remotely while
/// still referenced by at least one view's `synced_documents`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimboResolution {
    pub key: DocumentKey,
    pub received_document: bool,
}

impl LimboResolution {
    pub fn new(key: DocumentKey) -> Self {
        Self {
            key,
            received_document: false,
        }
    }
}

/// Side effect the caller must perform against the Remote Store after a
/// `LimboTracker` mutation. Kept a plain data type so the tracker itself has
/// no dependency on `RemoteStore`/`RemoteSyncer` and can be unit tested alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LimboTrackerAction {
    StartListening { target_id: i32, key: DocumentKey },
    StopListening { target_id: i32 },
}

/// Reference-counts documents that views have flagged as limbo candidates and
/// allocates/frees the single-key resolution listens backing them.
#[derive(Debug)]
pub struct LimboTracker {
    target_ids: TargetIdGenerator,
    limbo_targets_by_key: BTreeMap<DocumentKey, i32>,
    limbo_resolutions_by_target: BTreeMap<i32, LimboResolution>,
    limbo_document_refs: BTreeMap<DocumentKey, BTreeSet<i32>>,
    refs_by_view: BTreeMap<i32, BTreeSet<DocumentKey>>,
}

impl LimboTracker {
    pub fn new(target_ids: TargetIdGenerator) -> Self {
        Self {
            target_ids,
            limbo_targets_by_key: BTreeMap::new(),
            limbo_resolutions_by_target: BTreeMap::new(),
            limbo_document_refs: BTreeMap::new(),
            refs_by_view: BTreeMap::new(),
        }
    }

    pub fn target_for_key(&self, key: &DocumentKey) -> Option<i32> {
        self.limbo_targets_by_key.get(key).copied()
    }

    pub fn key_for_target(&self, target_id: i32) -> Option<&DocumentKey> {
        self.limbo_resolutions_by_target
            .get(&target_id)
            .map(|resolution| &resolution.key)
    }

    pub fn received_document(&self, target_id: i32) -> Option<bool> {
        self.limbo_resolutions_by_target
            .get(&target_id)
            .map(|resolution| resolution.received_document)
    }

    /// Marks that the limbo resolution listen has now seen the document
    /// exist. Returns the key, if `target_id` is a known limbo target.
    pub fn mark_received_document(&mut self, target_id: i32) -> Option<DocumentKey> {
        let resolution = self.limbo_resolutions_by_target.get_mut(&target_id)?;
        resolution.received_document = true;
        Some(resolution.key.clone())
    }

    /// Explicitly sets the received-document flag for a limbo target,
    /// returning the key if `target_id` is known. Used when a `TargetChange`
    /// removes a previously-added document from a limbo resolution target:
    /// the document existed a moment ago (`received_document` was `true`)
    /// and the watch stream now says it's gone, so the flag must flip back
    /// to `false` before the next add is allowed to be observed.
    pub fn set_received_document(&mut self, target_id: i32, value: bool) -> Option<DocumentKey> {
        let resolution = self.limbo_resolutions_by_target.get_mut(&target_id)?;
        resolution.received_document = value;
        Some(resolution.key.clone())
    }

    /// Applies the limbo deltas a single view produced, adding/removing
    /// (key, view_target_id) references and allocating or freeing resolution
    /// targets as reference counts cross zero.
    pub fn update_tracked_limbo_documents(
        &mut self,
        changes: &[LimboDocumentChange],
        view_target_id: i32,
    ) -> Vec<LimboTrackerAction> {
        let mut actions = Vec::new();
        for change in changes {
            match change.change_type {
                LimboDocumentChangeType::Added => {
                    self.add_reference(&change.key, view_target_id);
                    if !self.limbo_targets_by_key.contains_key(&change.key) {
                        let target_id = self.target_ids.next();
                        self.limbo_targets_by_key.insert(change.key.clone(), target_id);
                        self.limbo_resolutions_by_target
                            .insert(target_id, LimboResolution::new(change.key.clone()));
                        actions.push(LimboTrackerAction::StartListening {
                            target_id,
                            key: change.key.clone(),
                        });
                    }
                }
                LimboDocumentChangeType::Removed => {
                    self.remove_reference(&change.key, view_target_id);
                    if let Some(action) = self.remove_limbo_target_if_unreferenced(&change.key) {
                        actions.push(action);
                    }
                }
            }
        }
        actions
    }

    /// Drops every limbo reference a torn-down view held, freeing any
    /// resolution target whose reference count reaches zero as a result.
    pub fn remove_view(&mut self, view_target_id: i32) -> Vec<LimboTrackerAction> {
        let keys = self.refs_by_view.remove(&view_target_id).unwrap_or_default();
        let mut actions = Vec::new();
        for key in keys {
            self.remove_reference(&key, view_target_id);
            if let Some(action) = self.remove_limbo_target_if_unreferenced(&key) {
                actions.push(action);
            }
        }
        actions
    }

    /// Idempotent: safe to call for a key whose listen was already rejected.
    pub fn remove_limbo_target(&mut self, key: &DocumentKey) -> Option<LimboTrackerAction> {
        let target_id = self.limbo_targets_by_key.remove(key)?;
        self.limbo_resolutions_by_target.remove(&target_id);
        Some(LimboTrackerAction::StopListening { target_id })
    }

    /// Purges a key entirely: drops its resolution target (as
    /// `remove_limbo_target` does) *and* every view's reference to it.
    ///
    /// Used when a limbo listen is rejected and the synthetic delete that
    /// follows purges the key from the owning view's `synced_documents`
    /// directly, bypassing the normal `update_tracked_limbo_documents`
    /// REMOVED path — without this, `limbo_document_refs`/`refs_by_view`
    /// would keep a reference to a key with no resolution target, violating
    /// the invariant that every tracked key resolves to a live target.
    pub fn purge_key(&mut self, key: &DocumentKey) -> Option<LimboTrackerAction> {
        if let Some(views) = self.limbo_document_refs.remove(key) {
            for view_target_id in views {
                if let Some(keys) = self.refs_by_view.get_mut(&view_target_id) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.refs_by_view.remove(&view_target_id);
                    }
                }
            }
        }
        self.remove_limbo_target(key)
    }

    fn add_reference(&mut self, key: &DocumentKey, view_target_id: i32) {
        self.limbo_document_refs
            .entry(key.clone())
            .or_default()
            .insert(view_target_id);
        self.refs_by_view
            .entry(view_target_id)
            .or_default()
            .insert(key.clone());
    }

    fn remove_reference(&mut self, key: &DocumentKey, view_target_id: i32) {
        if let Some(refs) = self.limbo_document_refs.get_mut(key) {
            refs.remove(&view_target_id);
            if refs.is_empty() {
                self.limbo_document_refs.remove(key);
            }
        }
        if let Some(keys) = self.refs_by_view.get_mut(&view_target_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.refs_by_view.remove(&view_target_id);
            }
        }
    }

    fn remove_limbo_target_if_unreferenced(&mut self, key: &DocumentKey) -> Option<LimboTrackerAction> {
        if self.limbo_document_refs.contains_key(key) {
            return None;
        }
        self.remove_limbo_target(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn added(path: &str) -> LimboDocumentChange {
        LimboDocumentChange {
            change_type: LimboDocumentChangeType::Added,
            key: key(path),
        }
    }

    fn removed(path: &str) -> LimboDocumentChange {
        LimboDocumentChange {
            change_type: LimboDocumentChangeType::Removed,
            key: key(path),
        }
    }

    #[test]
    fn first_reference_allocates_a_target() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        let actions = tracker.update_tracked_limbo_documents(&[added("cities/x")], 2);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], LimboTrackerAction::StartListening { .. }));
        assert!(tracker.target_for_key(&key("cities/x")).is_some());
    }

    #[test]
    fn shared_reference_across_views_does_not_double_allocate() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        tracker.update_tracked_limbo_documents(&[added("cities/x")], 2);
        let actions = tracker.update_tracked_limbo_documents(&[added("cities/x")], 4);
        assert!(actions.is_empty());
    }

    #[test]
    fn target_freed_only_after_last_reference_removed() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        tracker.update_tracked_limbo_documents(&[added("cities/x")], 2);
        tracker.update_tracked_limbo_documents(&[added("cities/x")], 4);

        let actions = tracker.update_tracked_limbo_documents(&[removed("cities/x")], 2);
        assert!(actions.is_empty(), "one remaining reference keeps the target alive");

        let actions = tracker.update_tracked_limbo_documents(&[removed("cities/x")], 4);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], LimboTrackerAction::StopListening { .. }));
        assert!(tracker.target_for_key(&key("cities/x")).is_none());
    }

    #[test]
    fn tearing_down_a_view_releases_its_references() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        tracker.update_tracked_limbo_documents(&[added("cities/x"), added("cities/y")], 2);
        let actions = tracker.remove_view(2);
        assert_eq!(actions.len(), 2);
        assert!(tracker.target_for_key(&key("cities/x")).is_none());
        assert!(tracker.target_for_key(&key("cities/y")).is_none());
    }

    #[test]
    fn purge_key_drops_the_views_dangling_reference_too() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        tracker.update_tracked_limbo_documents(&[added("cities/x")], 2);

        let action = tracker.purge_key(&key("cities/x"));
        assert!(matches!(action, Some(LimboTrackerAction::StopListening { .. })));
        assert!(tracker.target_for_key(&key("cities/x")).is_none());

        // The view's own REMOVED notification must now be a no-op: the
        // reference is already gone, so no further action is produced and no
        // resolution target is double-freed.
        let actions = tracker.update_tracked_limbo_documents(&[removed("cities/x")], 2);
        assert!(actions.is_empty());
    }

    #[test]
    fn remove_limbo_target_is_idempotent() {
        let mut tracker = LimboTracker::new(TargetIdGenerator::for_sync_engine());
        tracker.update_tracked_limbo_documents(&[added("cities/x")], 2);
        assert!(tracker.remove_limbo_target(&key("cities/x")).is_some());
        assert!(tracker.remove_limbo_target(&key("cities/x")).is_none());
    }
}
