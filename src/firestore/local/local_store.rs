use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::firestore::api::Query;
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{DocumentKey, MaybeDocument, User};
use crate::firestore::remote::mutation::MutationBatchResult;

pub type BatchId = i32;

/// Why a query target was allocated. Threaded through to the Remote Store's
/// listen call so it can pick the right label/resume-token treatment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPurpose {
    Listen,
    LimboResolution,
    ExistenceFilterMismatch,
}

/// Result of allocating (or re-allocating) a query against the Local Store.
#[derive(Clone, Debug)]
pub struct QueryData {
    pub query: Query,
    pub target_id: i32,
    pub sequence_number: u64,
    pub purpose: QueryPurpose,
}

impl QueryData {
    pub fn new(query: Query, target_id: i32, sequence_number: u64, purpose: QueryPurpose) -> Self {
        Self {
            query,
            target_id,
            sequence_number,
            purpose,
        }
    }
}

/// Result of applying a mutation batch to the local cache.
#[derive(Clone, Debug)]
pub struct LocalWriteResult {
    pub batch_id: BatchId,
    pub changes: BTreeMap<DocumentKey, MaybeDocument>,
}

/// Added/removed document keys a view observed, reported back so the Local
/// Store can pin/unpin cache entries accordingly.
#[derive(Clone, Debug, Default)]
pub struct LocalViewChanges {
    pub target_id: i32,
    pub added_keys: BTreeSet<DocumentKey>,
    pub removed_keys: BTreeSet<DocumentKey>,
}

/// The persistent cache + pending mutation queue the Sync Engine coordinates
/// against. Implemented by [`crate::firestore::local::memory::MemoryLocalStore`].
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait LocalStore: Send + Sync {
    async fn allocate_query(&self, query: &Query) -> FirestoreResult<QueryData>;

    async fn release_query(&self, target_id: i32) -> FirestoreResult<()>;

    async fn execute_query(
        &self,
        query: &Query,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>>;

    async fn get_remote_document_keys(&self, target_id: i32) -> FirestoreResult<BTreeSet<DocumentKey>>;

    async fn write_locally(
        &self,
        user: &User,
        writes: Vec<crate::firestore::remote::datastore::WriteOperation>,
    ) -> FirestoreResult<LocalWriteResult>;

    async fn apply_remote_event(
        &self,
        event: &crate::firestore::remote::remote_event::RemoteEvent,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>>;

    async fn acknowledge_batch(
        &self,
        result: &MutationBatchResult,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>>;

    async fn reject_batch(
        &self,
        batch_id: BatchId,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>>;

    async fn notify_local_view_changes(&self, changes: Vec<LocalViewChanges>) -> FirestoreResult<()>;

    async fn get_highest_unacknowledged_batch_id(&self) -> FirestoreResult<Option<BatchId>>;

    async fn handle_user_change(
        &self,
        user: &User,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>>;
}
