use std::collections::{BTreeMap, BTreeSet};

use crate::firestore::api::{DocumentSnapshot, Query, QueryDocumentChange, QuerySnapshotMetadata};
use crate::firestore::compute_doc_changes;
use crate::firestore::model::{DocumentKey, MaybeDocument};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::remote::online_state::OnlineState;
use crate::firestore::remote::remote_event::TargetChange;

use super::local_store::LocalViewChanges;

/// `LOCAL` while offline or before the server has confirmed CURRENT; `SYNCED`
/// once the backing target has been marked current by the watch stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Local,
    Synced,
}

/// Direction a document moved into/out of limbo for a single view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimboDocumentChangeType {
    Added,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimboDocumentChange {
    pub change_type: LimboDocumentChangeType,
    pub key: DocumentKey,
}

/// Delta a view's document set underwent from applying `changes`, prior to
/// reconciling against a `TargetChange`.
#[derive(Clone, Debug, Default)]
pub struct ViewDocumentChanges {
    pub document_set: Vec<DocumentSnapshot>,
    pub needs_refill: bool,
}

impl ViewDocumentChanges {
    pub fn needs_refill(&self) -> bool {
        self.needs_refill
    }
}

/// Result of applying a `ViewDocumentChanges` (and optionally a
/// `TargetChange`) to a `View`: an optional snapshot (only present when
/// observable state actually changed) plus the limbo deltas this view
/// produced.
#[derive(Clone, Debug, Default)]
pub struct ViewChange {
    pub snapshot: Option<(Vec<DocumentSnapshot>, QuerySnapshotMetadata, Vec<QueryDocumentChange>)>,
    pub limbo_changes: Vec<LimboDocumentChange>,
}

/// Materializes a single query's result from the local document cache plus
/// the server's notion of what belongs in the target, detecting limbo
/// documents along the way.
///
/// Tie-breaks follow the query's explicit `order_by` then document key
/// ascending, which `apply_query_to_documents`/`compute_doc_changes` already
/// guarantee via `QueryDefinition::result_order_by()`.
#[derive(Debug)]
pub struct View {
    query: Query,
    synced_documents: BTreeSet<DocumentKey>,
    document_set: Vec<DocumentSnapshot>,
    sync_state: SyncState,
    has_pending_writes: bool,
    /// Keys last reported to the Local Store via `keys_for_local_view_changes`,
    /// so the next call can diff against it and report real `removed_keys`
    /// instead of only ever growing the Local Store's pinned set.
    local_view_reference_keys: BTreeSet<DocumentKey>,
}

impl View {
    pub fn new(query: Query, synced_documents: BTreeSet<DocumentKey>) -> Self {
        Self {
            query,
            synced_documents,
            document_set: Vec::new(),
            sync_state: SyncState::Local,
            has_pending_writes: false,
            local_view_reference_keys: BTreeSet::new(),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn synced_documents(&self) -> &BTreeSet<DocumentKey> {
        &self.synced_documents
    }

    pub fn document_set(&self) -> &[DocumentSnapshot] {
        &self.document_set
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Re-runs the query's filter/order/limit over `changes` merged on top of
    /// the view's current document set. A limit query that loses a document
    /// from inside its window needs a full re-fill from the Local Store
    /// (`needs_refill`) because the correct replacement document isn't
    /// necessarily among `changes`.
    pub fn compute_doc_changes(
        &self,
        changes: &BTreeMap<DocumentKey, MaybeDocument>,
    ) -> ViewDocumentChanges {
        let definition = self.query.definition();
        let mut candidates: BTreeMap<DocumentKey, DocumentSnapshot> = self
            .document_set
            .iter()
            .map(|doc| (doc.document_key().clone(), doc.clone()))
            .collect();

        let mut removed_from_window = false;
        for (key, maybe_doc) in changes {
            if !definition.matches_collection(key) {
                continue;
            }
            match maybe_doc {
                MaybeDocument::Document { data, .. } => {
                    let snapshot = maybe_document_to_snapshot(maybe_doc, data.clone());
                    candidates.insert(key.clone(), snapshot);
                }
                MaybeDocument::NoDocument { .. } => {
                    if candidates.remove(key).is_some()
                        && self.document_set.iter().any(|doc| doc.document_key() == key)
                    {
                        removed_from_window = true;
                    }
                }
            }
        }

        let document_set = apply_query_to_documents(candidates.into_values().collect(), &definition);

        let needs_refill = removed_from_window
            && definition.limit().is_some()
            && document_set.len() < definition.limit().unwrap() as usize;

        ViewDocumentChanges {
            document_set,
            needs_refill,
        }
    }

    /// Variant used after a limit re-fill: `full_result` is the complete,
    /// freshly executed query result from the Local Store.
    pub fn compute_doc_changes_from_result(&self, full_result: Vec<DocumentSnapshot>) -> ViewDocumentChanges {
        let definition = self.query.definition();
        ViewDocumentChanges {
            document_set: apply_query_to_documents(full_result, &definition),
            needs_refill: false,
        }
    }

    /// Applies computed document changes (and, if the server has spoken,
    /// a `TargetChange`) to this view, producing a `ViewChange`.
    pub fn apply_changes(
        &mut self,
        doc_changes: ViewDocumentChanges,
        target_change: Option<&TargetChange>,
    ) -> ViewChange {
        let old_document_set = self.document_set.clone();
        let old_synced = self.synced_documents.clone();
        let old_sync_state = self.sync_state;

        if let Some(target_change) = target_change {
            for key in &target_change.added_documents {
                self.synced_documents.insert(key.clone());
            }
            for key in &target_change.modified_documents {
                self.synced_documents.insert(key.clone());
            }
            for key in &target_change.removed_documents {
                self.synced_documents.remove(key);
            }
            if target_change.current {
                self.sync_state = SyncState::Synced;
            }
        }

        self.document_set = doc_changes.document_set;
        self.has_pending_writes = self
            .document_set
            .iter()
            .any(|doc| doc.has_pending_writes());

        let current_keys: BTreeSet<DocumentKey> = self
            .document_set
            .iter()
            .map(|doc| doc.document_key().clone())
            .collect();
        let limbo_keys: BTreeSet<DocumentKey> = self
            .synced_documents
            .difference(&current_keys)
            .cloned()
            .collect();

        let mut limbo_changes = Vec::new();
        for key in limbo_keys.iter() {
            if !self.limbo_at(&old_synced, &old_document_set, key) {
                limbo_changes.push(LimboDocumentChange {
                    change_type: LimboDocumentChangeType::Added,
                    key: key.clone(),
                });
            }
        }
        let old_limbo: BTreeSet<DocumentKey> = self.limbo_set(&old_synced, &old_document_set);
        for key in old_limbo.iter() {
            if !limbo_keys.contains(key) {
                limbo_changes.push(LimboDocumentChange {
                    change_type: LimboDocumentChangeType::Removed,
                    key: key.clone(),
                });
            }
        }

        let doc_set_changed = !documents_equal(&old_document_set, &self.document_set);
        let sync_state_changed = old_sync_state != self.sync_state;
        let snapshot = if doc_set_changed || sync_state_changed || target_change.is_some() {
            let changes = compute_doc_changes(Some(&old_document_set), &self.document_set);
            let metadata = QuerySnapshotMetadata::new(
                self.sync_state == SyncState::Local,
                self.has_pending_writes,
                sync_state_changed,
                target_change.and_then(|change| change.resume_token.clone()),
                None,
            );
            Some((self.document_set.clone(), metadata, changes))
        } else {
            None
        };

        ViewChange {
            snapshot,
            limbo_changes,
        }
    }

    /// Applies an online-state transition. Never produces limbo changes:
    /// online state can only affect `sync_state`, never document membership.
    pub fn apply_online_state_change(&mut self, state: OnlineState) -> ViewChange {
        let old_sync_state = self.sync_state;
        let new_sync_state = match state {
            OnlineState::Offline => SyncState::Local,
            OnlineState::Online | OnlineState::Unknown => self.sync_state,
        };
        self.sync_state = new_sync_state;

        if old_sync_state == new_sync_state {
            return ViewChange::default();
        }

        let metadata = QuerySnapshotMetadata::new(
            self.sync_state == SyncState::Local,
            self.has_pending_writes,
            true,
            None,
            None,
        );
        ViewChange {
            snapshot: Some((self.document_set.clone(), metadata, Vec::new())),
            limbo_changes: Vec::new(),
        }
    }

    /// Drops `keys` from `synced_documents` without touching `document_set`,
    /// as if the server had withdrawn its confirmation that they belong to
    /// the target. Used when a limbo resolution listen is rejected: the
    /// synthetic event that follows carries no `TargetChange` for this
    /// view's own target, so there is nothing else that would otherwise
    /// clear the key from `synced_documents`.
    pub fn purge_resolved_limbo_documents(&mut self, keys: &BTreeSet<DocumentKey>) {
        for key in keys {
            self.synced_documents.remove(key);
        }
    }

    /// Diffs the view's current document set against the keys last reported
    /// here, so the Local Store can pin newly-added keys and unpin ones that
    /// dropped out (e.g. a limit query's re-fill, or a key turning into a
    /// `NoDocument`) instead of only ever accumulating references.
    pub fn keys_for_local_view_changes(&mut self, target_id: i32) -> LocalViewChanges {
        let current_keys: BTreeSet<DocumentKey> = self
            .document_set
            .iter()
            .map(|doc| doc.document_key().clone())
            .collect();

        let added_keys: BTreeSet<DocumentKey> = current_keys
            .difference(&self.local_view_reference_keys)
            .cloned()
            .collect();
        let removed_keys: BTreeSet<DocumentKey> = self
            .local_view_reference_keys
            .difference(&current_keys)
            .cloned()
            .collect();

        self.local_view_reference_keys = current_keys;

        LocalViewChanges {
            target_id,
            added_keys,
            removed_keys,
        }
    }

    fn limbo_set(&self, synced: &BTreeSet<DocumentKey>, document_set: &[DocumentSnapshot]) -> BTreeSet<DocumentKey> {
        let present: BTreeSet<DocumentKey> = document_set
            .iter()
            .map(|doc| doc.document_key().clone())
            .collect();
        synced.difference(&present).cloned().collect()
    }

    fn limbo_at(&self, synced: &BTreeSet<DocumentKey>, document_set: &[DocumentSnapshot], key: &DocumentKey) -> bool {
        self.limbo_set(synced, document_set).contains(key)
    }
}

fn maybe_document_to_snapshot(
    maybe_doc: &MaybeDocument,
    data: crate::firestore::value::MapValue,
) -> DocumentSnapshot {
    use crate::firestore::api::SnapshotMetadata;
    DocumentSnapshot::new(
        maybe_doc.key().clone(),
        Some(data),
        SnapshotMetadata::new(false, false),
    )
}

/// Converts a Local Store result map into the ordered-result input
/// `compute_doc_changes_from_result` expects, used by the sync controller
/// after a limit re-fill. `execute_query`'s result only ever holds
/// `Document` entries (a `NoDocument` is simply absent), so there is nothing
/// to filter here beyond the variant match.
pub(crate) fn documents_from_result(result: &BTreeMap<DocumentKey, MaybeDocument>) -> Vec<DocumentSnapshot> {
    result
        .values()
        .filter_map(|maybe_doc| match maybe_doc {
            MaybeDocument::Document { data, .. } => Some(maybe_document_to_snapshot(maybe_doc, data.clone())),
            MaybeDocument::NoDocument { .. } => None,
        })
        .collect()
}

fn documents_equal(left: &[DocumentSnapshot], right: &[DocumentSnapshot]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .all(|(l, r)| l.document_key() == r.document_key() && l.data() == r.data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::Firestore;
    use crate::firestore::model::{DatabaseId, Timestamp};
    use crate::firestore::value::MapValue;
    use crate::test_support::firebase::test_firebase_app_with_api_key;

    fn sample_query() -> Query {
        let app = test_firebase_app_with_api_key("view-test");
        let firestore = Firestore::new(app, DatabaseId::new("test", "(default)"));
        firestore.collection("cities").expect("collection").query()
    }

    fn doc(key: &str, version: i64) -> MaybeDocument {
        MaybeDocument::Document {
            key: DocumentKey::from_string(key).unwrap(),
            version: Timestamp::new(version, 0),
            data: MapValue::new(Default::default()),
        }
    }

    #[test]
    fn first_listen_produces_no_limbo() {
        let query = sample_query();
        let mut view = View::new(query, BTreeSet::new());
        let mut changes = BTreeMap::new();
        changes.insert(
            DocumentKey::from_string("cities/sf").unwrap(),
            doc("cities/sf", 1),
        );
        let doc_changes = view.compute_doc_changes(&changes);
        let change = view.apply_changes(doc_changes, None);
        assert!(change.limbo_changes.is_empty());
        assert_eq!(view.document_set().len(), 1);
    }

    #[test]
    fn server_confirmed_key_absent_locally_goes_to_limbo() {
        let query = sample_query();
        let key = DocumentKey::from_string("cities/x").unwrap();
        let mut view = View::new(query, BTreeSet::new());

        let mut target_change = TargetChange::default();
        target_change.added_documents.insert(key.clone());
        target_change.current = true;

        let doc_changes = view.compute_doc_changes(&BTreeMap::new());
        let change = view.apply_changes(doc_changes, Some(&target_change));

        assert_eq!(change.limbo_changes.len(), 1);
        assert_eq!(change.limbo_changes[0].change_type, LimboDocumentChangeType::Added);
        assert_eq!(change.limbo_changes[0].key, key);
    }

    #[test]
    fn online_state_change_never_produces_limbo() {
        let query = sample_query();
        let mut view = View::new(query, BTreeSet::new());
        let change = view.apply_online_state_change(OnlineState::Offline);
        assert!(change.limbo_changes.is_empty());
    }

    #[test]
    fn local_view_changes_reports_both_added_and_removed_keys() {
        let query = sample_query();
        let mut view = View::new(query, BTreeSet::new());

        let mut changes = BTreeMap::new();
        changes.insert(
            DocumentKey::from_string("cities/sf").unwrap(),
            doc("cities/sf", 1),
        );
        let doc_changes = view.compute_doc_changes(&changes);
        view.apply_changes(doc_changes, None);

        let first = view.keys_for_local_view_changes(7);
        assert_eq!(
            first.added_keys,
            BTreeSet::from([DocumentKey::from_string("cities/sf").unwrap()])
        );
        assert!(first.removed_keys.is_empty());

        // A second call with no further changes should report nothing new.
        let unchanged = view.keys_for_local_view_changes(7);
        assert!(unchanged.added_keys.is_empty());
        assert!(unchanged.removed_keys.is_empty());

        // `sf` drops out of the result (e.g. a NoDocument deletion).
        let mut removal = BTreeMap::new();
        removal.insert(
            DocumentKey::from_string("cities/sf").unwrap(),
            MaybeDocument::NoDocument {
                key: DocumentKey::from_string("cities/sf").unwrap(),
                version: Timestamp::new(2, 0),
                has_committed_mutations: false,
            },
        );
        let doc_changes = view.compute_doc_changes(&removal);
        view.apply_changes(doc_changes, None);

        let after_removal = view.keys_for_local_view_changes(7);
        assert!(after_removal.added_keys.is_empty());
        assert_eq!(
            after_removal.removed_keys,
            BTreeSet::from([DocumentKey::from_string("cities/sf").unwrap()])
        );
    }
}
