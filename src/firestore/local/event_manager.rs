use crate::firestore::api::{Query, QueryDocumentChange, QuerySnapshotMetadata};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::error::FirestoreError;
use crate::firestore::remote::online_state::OnlineState;

/// A single query's freshly computed result, ready to hand to the
/// application's listener.
#[derive(Clone, Debug)]
pub struct ViewSnapshot {
    pub query: Query,
    pub documents: Vec<DocumentSnapshot>,
    pub metadata: QuerySnapshotMetadata,
    pub doc_changes: Vec<QueryDocumentChange>,
}

/// Callback contract the Sync Controller invokes to push results upward.
/// Implemented by whatever owns the application-facing query listener
/// registry (outside the scope of this subsystem).
pub trait SyncEventListener: Send + Sync {
    fn on_view_snapshots(&self, snapshots: Vec<ViewSnapshot>);

    fn on_error(&self, query: Query, error: FirestoreError);

    fn on_online_state_change(&self, state: OnlineState);
}
