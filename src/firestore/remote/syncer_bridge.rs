use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_lock::Mutex;
use async_trait::async_trait;

use crate::firestore::error::{internal_error, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, Timestamp};
use crate::firestore::remote::mutation::{MutationBatch, MutationBatchResult};
use crate::firestore::remote::remote_event::RemoteEvent;
use crate::firestore::remote::remote_syncer::{box_remote_store_future, RemoteStoreFuture, RemoteSyncer};
use crate::firestore::remote::streams::write::WriteResult;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RemoteSyncerDelegate: Send + Sync + 'static {
    async fn handle_remote_event(&self, event: RemoteEvent) -> FirestoreResult<()>;
    async fn handle_rejected_listen(&self, target_id: i32, error: FirestoreError) -> FirestoreResult<()>;
    async fn handle_successful_write(&self, result: MutationBatchResult) -> FirestoreResult<()>;
    async fn handle_failed_write(&self, batch_id: i32, error: FirestoreError) -> FirestoreResult<()>;

    async fn handle_credential_change(&self) -> FirestoreResult<()> {
        Ok(())
    }

    fn notify_stream_token_change(&self, _token: Option<Vec<u8>>) {}

    fn record_write_results(&self, _batch_id: i32, _results: &[WriteResult]) {}

    fn update_target_metadata(&self, _target_id: i32, _update: TargetMetadataUpdate) {}

    fn reset_target_metadata(&self, _target_id: i32) {}

    fn record_resolved_limbo_documents(&self, _documents: &BTreeSet<DocumentKey>) {}

    fn handle_online_state_change(&self, _state: crate::firestore::remote::online_state::OnlineState) {}

    /// The authoritative set of keys the delegate believes are synced for
    /// `target_id`: a query view's `synced_documents` for a user listen, or
    /// the single-key `{key}`/`∅` special case for a limbo resolution target
    /// (§4.1 `getRemoteKeysForTarget`). Defaults to empty for delegates (test
    /// doubles, mostly) that don't track this.
    fn get_remote_keys_for_target(&self, _target_id: i32) -> BTreeSet<DocumentKey> {
        BTreeSet::new()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TargetMetadataUpdate {
    pub resume_token: Option<Vec<u8>>,
    pub snapshot_version: Option<Timestamp>,
    pub current: bool,
    pub added_documents: BTreeSet<DocumentKey>,
    pub modified_documents: BTreeSet<DocumentKey>,
    pub removed_documents: BTreeSet<DocumentKey>,
}

impl TargetMetadataUpdate {
    pub fn from_change(
        change: &crate::firestore::remote::remote_event::TargetChange,
        snapshot: Option<Timestamp>,
    ) -> Self {
        Self {
            resume_token: change.resume_token.clone(),
            snapshot_version: snapshot,
            current: change.current,
            added_documents: change.added_documents.clone(),
            modified_documents: change.modified_documents.clone(),
            removed_documents: change.removed_documents.clone(),
        }
    }
}

/// Concrete `RemoteSyncer` implementation that bridges the remote store façade
/// with higher layers (local store, query views, etc.).
///
/// The bridge keeps track of remote document keys per target so watch change
/// aggregation mirrors the JS SDK, manages the pending mutation queue that feeds
/// the write stream, and delegates actual data processing to the provided
/// [`RemoteSyncerDelegate`].
pub struct RemoteSyncerBridge<D>
where
    D: RemoteSyncerDelegate,
{
    delegate: Arc<D>,
    remote_keys: StdMutex<BTreeMap<i32, BTreeSet<DocumentKey>>>,
    mutation_queue: Mutex<MutationQueue>,
}

impl<D> RemoteSyncerBridge<D>
where
    D: RemoteSyncerDelegate,
{
    pub fn new(delegate: Arc<D>) -> Self {
        Self {
            delegate,
            remote_keys: StdMutex::new(BTreeMap::new()),
            mutation_queue: Mutex::new(MutationQueue::default()),
        }
    }

    pub fn delegate(&self) -> Arc<D> {
        Arc::clone(&self.delegate)
    }

    pub fn seed_remote_keys(&self, target_id: i32, keys: BTreeSet<DocumentKey>) {
        let mut guard = self.remote_keys.lock().unwrap();
        guard.insert(target_id, keys);
    }

    pub fn replace_remote_keys(&self, target_id: i32, keys: BTreeSet<DocumentKey>) {
        {
            let mut guard = self.remote_keys.lock().unwrap();
            guard.insert(target_id, keys.clone());
        }

        self.delegate.reset_target_metadata(target_id);
        if !keys.is_empty() {
            let mut update = TargetMetadataUpdate::default();
            update.added_documents = keys;
            self.delegate.update_target_metadata(target_id, update);
        }
    }

    pub fn clear_remote_keys(&self, target_id: i32) {
        let mut guard = self.remote_keys.lock().unwrap();
        guard.remove(&target_id);
    }

    pub async fn enqueue_batch(&self, batch: MutationBatch) -> FirestoreResult<()> {
        let mut guard = self.mutation_queue.lock().await;
        guard.enqueue(batch)
    }

    pub async fn pending_batch_ids(&self) -> Vec<i32> {
        let guard = self.mutation_queue.lock().await;
        guard.batches.iter().map(|batch| batch.batch_id).collect()
    }

    pub fn remote_keys_for_target(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        self.remote_keys
            .lock()
            .unwrap()
            .get(&target_id)
            .cloned()
            .unwrap_or_default()
    }

    fn update_remote_keys_from_event(&self, event: &RemoteEvent) {
        let mut pending_updates: Vec<(i32, TargetMetadataUpdate)> = Vec::new();
        {
            let mut guard = self.remote_keys.lock().unwrap();
            for (target_id, change) in &event.target_changes {
                let keys = guard.entry(*target_id).or_default();
                for key in &change.removed_documents {
                    keys.remove(key);
                }
                for key in change.added_documents.iter().chain(change.modified_documents.iter()) {
                    keys.insert(key.clone());
                }
                pending_updates.push((*target_id, TargetMetadataUpdate::from_change(change, event.snapshot_version)));
            }

            for target_id in &event.target_resets {
                guard.remove(target_id);
            }
        }

        for (target_id, update) in pending_updates {
            self.delegate.update_target_metadata(target_id, update);
        }

        for target_id in &event.target_resets {
            self.delegate.reset_target_metadata(*target_id);
        }

        if !event.resolved_limbo_documents.is_empty() {
            self.delegate
                .record_resolved_limbo_documents(&event.resolved_limbo_documents);
        }
    }
}

impl<D> RemoteSyncer for RemoteSyncerBridge<D>
where
    D: RemoteSyncerDelegate,
{
    fn apply_remote_event(&self, event: RemoteEvent) -> RemoteStoreFuture<'_, FirestoreResult<()>> {
        self.update_remote_keys_from_event(&event);
        let delegate = Arc::clone(&self.delegate);
        box_remote_store_future(async move { delegate.handle_remote_event(event).await })
    }

    fn reject_listen(&self, target_id: i32, error: FirestoreError) -> RemoteStoreFuture<'_, FirestoreResult<()>> {
        self.clear_remote_keys(target_id);
        let delegate = Arc::clone(&self.delegate);
        box_remote_store_future(async move { delegate.handle_rejected_listen(target_id, error).await })
    }

    fn apply_successful_write(&self, result: MutationBatchResult) -> RemoteStoreFuture<'_, FirestoreResult<()>> {
        let queue = &self.mutation_queue;
        let batch_id = result.batch_id();
        let delegate = Arc::clone(&self.delegate);
        box_remote_store_future(async move {
            {
                let mut guard = queue.lock().await;
                guard.remove(batch_id)?;
            }
            delegate.handle_successful_write(result).await
        })
    }

    fn reject_failed_write(&self, batch_id: i32, error: FirestoreError) -> RemoteStoreFuture<'_, FirestoreResult<()>> {
        let queue = &self.mutation_queue;
        let delegate = Arc::clone(&self.delegate);
        box_remote_store_future(async move {
            {
                let mut guard = queue.lock().await;
                guard.remove(batch_id)?;
            }
            delegate.handle_failed_write(batch_id, error).await
        })
    }

    /// The watch-change aggregator's window into "what does this target
    /// contain", consulted to detect deletions a CURRENT marker implies.
    /// Delegates to the `RemoteSyncerDelegate` (the Sync Engine) rather than
    /// this bridge's own `remote_keys` cache: the Sync Engine already tracks
    /// the authoritative answer (a view's `synced_documents`, or the limbo
    /// resolution's `{key}`/`∅` special case) and is the thing §4.1 specifies
    /// `getRemoteKeysForTarget` against.
    fn get_remote_keys_for_target(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        self.delegate.get_remote_keys_for_target(target_id)
    }

    fn next_mutation_batch(
        &self,
        after_batch_id: Option<i32>,
    ) -> RemoteStoreFuture<'_, FirestoreResult<Option<MutationBatch>>> {
        let queue = &self.mutation_queue;
        box_remote_store_future(async move {
            let guard = queue.lock().await;
            Ok(guard.next_after(after_batch_id))
        })
    }

    fn handle_credential_change(&self) -> RemoteStoreFuture<'_, FirestoreResult<()>> {
        let delegate = Arc::clone(&self.delegate);
        box_remote_store_future(async move { delegate.handle_credential_change().await })
    }

    fn notify_stream_token_change(&self, token: Option<Vec<u8>>) {
        self.delegate.notify_stream_token_change(token);
    }

    fn record_write_results(&self, batch_id: i32, results: &[WriteResult]) {
        self.delegate.record_write_results(batch_id, results);
    }

    fn handle_online_state_change(&self, state: crate::firestore::remote::online_state::OnlineState) {
        self.delegate.handle_online_state_change(state);
    }
}

#[derive(Default)]
struct MutationQueue {
    batches: Vec<MutationBatch>,
}

impl MutationQueue {
    fn enqueue(&mut self, batch: MutationBatch) -> FirestoreResult<()> {
        match self
            .batches
            .binary_search_by_key(&batch.batch_id, |existing| existing.batch_id)
        {
            Ok(_) => Err(internal_error(format!("Duplicate mutation batch id {} queued", batch.batch_id))),
            Err(pos) => {
                self.batches.insert(pos, batch);
                Ok(())
            }
        }
    }

    fn remove(&mut self, batch_id: i32) -> FirestoreResult<MutationBatch> {
        match self
            .batches
            .binary_search_by_key(&batch_id, |existing| existing.batch_id)
        {
            Ok(pos) => Ok(self.batches.remove(pos)),
            Err(_) => Err(internal_error(format!("Mutation batch {batch_id} not found in queue"))),
        }
    }

    fn next_after(&self, after: Option<i32>) -> Option<MutationBatch> {
        let threshold = after.unwrap_or(-1);
        self.batches.iter().find(|batch| batch.batch_id > threshold).cloned()
    }
}
