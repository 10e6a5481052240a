use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::firestore::api::database::Firestore;
use crate::firestore::api::Query;
use crate::firestore::error::{internal_error, is_retryable, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, MaybeDocument, User};
use crate::firestore::remote::datastore::{Datastore, WriteOperation};
use crate::firestore::remote::online_state::OnlineState;
use crate::firestore::remote::remote_event::RemoteEvent;
use crate::firestore::remote::syncer_bridge::{RemoteSyncerBridge, RemoteSyncerDelegate};
use crate::firestore::remote::{
    JsonProtoSerializer, ListenTarget, MutationBatchResult, NetworkLayer, RemoteStore,
    RemoteStoreFuture, RemoteSyncer, Transaction,
};

use super::event_manager::{SyncEventListener, ViewSnapshot};
use super::limbo::{LimboTracker, LimboTrackerAction};
use super::local_store::LocalStore;
use super::mutation_callbacks::{MutationCallbackRegistry, OneShotCompletion};
use super::query_view_registry::{QueryView, QueryViewRegistry};
use super::target_id_generator::TargetIdGenerator;
use super::view::documents_from_result;
use super::view::View;

struct SyncEngineState {
    query_views: QueryViewRegistry,
    limbo_tracker: LimboTracker,
    current_user: User,
}

/// The Sync Controller: the single entry point every external signal
/// (application listen/write calls, remote events, write acknowledgments,
/// connectivity and credential changes) funnels through, reconciling the
/// Local Store, Remote Store and per-query `View`s into application-facing
/// `ViewSnapshot`s.
///
/// Construction is two-phase, the same pattern `RemoteStoreInner` uses for
/// its own `Weak` self-reference: `new` produces an `Arc<SyncEngine>` with no
/// `RemoteStore` yet, since a `RemoteStore` can only be built once it has a
/// `RemoteSyncer` to call back into, and that `RemoteSyncer` is a
/// `RemoteSyncerBridge` wrapping this very engine. `attach_remote_store`
/// closes the cycle.
pub struct SyncEngine {
    local_store: Arc<dyn LocalStore>,
    serializer: JsonProtoSerializer,
    remote_store: OnceCell<RemoteStore>,
    callbacks: MutationCallbackRegistry,
    event_listener: StdMutex<Option<Arc<dyn SyncEventListener>>>,
    state: StdMutex<SyncEngineState>,
}

impl SyncEngine {
    pub fn new(local_store: Arc<dyn LocalStore>, serializer: JsonProtoSerializer) -> Arc<Self> {
        Arc::new(Self {
            local_store,
            serializer,
            remote_store: OnceCell::new(),
            callbacks: MutationCallbackRegistry::new(),
            event_listener: StdMutex::new(None),
            state: StdMutex::new(SyncEngineState {
                query_views: QueryViewRegistry::new(),
                limbo_tracker: LimboTracker::new(TargetIdGenerator::for_sync_engine()),
                current_user: User::unauthenticated(),
            }),
        })
    }

    /// Builds the `RemoteStore` this engine drives, wiring it back to `self`
    /// via a `RemoteSyncerBridge`. Must be called exactly once, before any
    /// other method; panics on a second call.
    pub fn attach_remote_store(
        self: &Arc<Self>,
        network_layer: NetworkLayer,
        transaction_datastore: Option<(Firestore, Arc<dyn Datastore>)>,
    ) -> &RemoteStore {
        let bridge = Arc::new(RemoteSyncerBridge::new(Arc::clone(self)));
        let remote_store = RemoteStore::new(
            network_layer,
            self.serializer.clone(),
            bridge as Arc<dyn RemoteSyncer>,
            transaction_datastore,
        );
        self.remote_store
            .set(remote_store)
            .unwrap_or_else(|_| panic!("SyncEngine::attach_remote_store called more than once"));
        self.remote_store()
    }

    pub fn set_event_listener(&self, listener: Arc<dyn SyncEventListener>) {
        *self.event_listener.lock().unwrap() = Some(listener);
    }

    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.local_store
    }

    fn remote_store(&self) -> &RemoteStore {
        self.remote_store
            .get()
            .expect("SyncEngine::attach_remote_store must run before any other operation")
    }

    /// Registers a listener for `query`, fails hard on a duplicate (by
    /// canonical id).
    pub async fn listen(&self, query: Query) -> FirestoreResult<i32> {
        {
            let state = self.state.lock().unwrap();
            if state.query_views.contains_query(&query) {
                return Err(internal_error(format!(
                    "listen called for an already-registered query {}",
                    query.canonical_id()
                )));
            }
        }

        let query_data = self.local_store.allocate_query(&query).await?;
        let target_id = query_data.target_id;

        let local_docs = self.local_store.execute_query(&query).await?;
        let remote_keys = self.local_store.get_remote_document_keys(target_id).await?;

        let mut view = View::new(query.clone(), remote_keys);
        let doc_changes = view.compute_doc_changes(&local_docs);
        let view_change = view.apply_changes(doc_changes, None);
        if !view_change.limbo_changes.is_empty() {
            return Err(internal_error(
                "initial listen produced limbo documents; nothing can be missing before the server has spoken",
            ));
        }

        let snapshot = view_change
            .snapshot
            .map(|(documents, metadata, doc_changes)| ViewSnapshot {
                query: query.clone(),
                documents,
                metadata,
                doc_changes,
            });

        {
            let mut state = self.state.lock().unwrap();
            state
                .query_views
                .insert(QueryView::new(query.clone(), target_id, view));
        }

        if let Some(snapshot) = snapshot {
            self.emit_snapshots(vec![snapshot]);
        }

        let definition = query.definition();
        let listen_target = ListenTarget::for_query(&self.serializer, target_id, &definition)?;
        self.remote_store().listen(listen_target).await?;

        Ok(target_id)
    }

    pub async fn stop_listening(&self, query: &Query) -> FirestoreResult<()> {
        let target_id = {
            let mut state = self.state.lock().unwrap();
            state.query_views.remove_by_query(query).map(|qv| qv.target_id)
        };
        let Some(target_id) = target_id else {
            return Err(internal_error(format!(
                "stop_listening called for an unregistered query {}",
                query.canonical_id()
            )));
        };

        let limbo_actions = {
            let mut state = self.state.lock().unwrap();
            state.limbo_tracker.remove_view(target_id)
        };
        for action in limbo_actions {
            self.apply_limbo_action(action).await?;
        }

        self.local_store.release_query(target_id).await?;
        self.remote_store().unlisten(target_id).await?;
        Ok(())
    }

    pub async fn write_mutations(
        &self,
        writes: Vec<WriteOperation>,
        user_completion: User,
    ) -> FirestoreResult<OneShotCompletion> {
        let result = self.local_store.write_locally(&user_completion, writes).await?;
        let completion = self.callbacks.register_batch_callback(&user_completion, result.batch_id);
        self.emit_new_snaps_and_notify_local_store(&result.changes, None).await?;
        self.remote_store().pump_writes().await?;
        Ok(completion)
    }

    pub async fn register_pending_writes_task(&self) -> FirestoreResult<OneShotCompletion> {
        match self.local_store.get_highest_unacknowledged_batch_id().await? {
            None => Ok(OneShotCompletion::ready(Ok(()))),
            Some(batch_id) => Ok(self.callbacks.register_pending_writes_callback(batch_id)),
        }
    }

    /// Runs `update_fn` against a fresh `Transaction` on every attempt,
    /// retrying up to `retries` times (must be `>= 0`) when the user
    /// function or the commit fails with a retryable error.
    pub async fn transaction<T, F>(&self, retries: u32, mut update_fn: F) -> FirestoreResult<T>
    where
        F: for<'a> FnMut(&'a mut Transaction) -> RemoteStoreFuture<'a, FirestoreResult<T>>,
    {
        let mut attempts_left = retries;
        loop {
            let mut txn = self.remote_store().create_transaction().await;
            match update_fn(&mut txn).await {
                Ok(value) => match txn.commit().await {
                    Ok(()) => return Ok(value),
                    Err(err) if is_retryable(&err) && attempts_left > 0 => {
                        attempts_left -= 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                },
                Err(err) if is_retryable(&err) && attempts_left > 0 => {
                    attempts_left -= 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Used by the watch-change aggregator (via `RemoteSyncerBridge`'s own
    /// cache) is a separate concern; this is the Sync Controller's own
    /// answer, consulted by tests and by limbo bookkeeping.
    pub fn get_remote_keys_for_target(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        let state = self.state.lock().unwrap();
        if let Some(key) = state.limbo_tracker.key_for_target(target_id) {
            return if state.limbo_tracker.received_document(target_id).unwrap_or(false) {
                BTreeSet::from([key.clone()])
            } else {
                BTreeSet::new()
            };
        }
        state
            .query_views
            .get_by_target(target_id)
            .map(|qv| qv.view.synced_documents().clone())
            .unwrap_or_default()
    }

    /// The application-facing half of `handleCredentialChange`: orphans the
    /// previous user's pending-writes waiters, swaps the Local Store's
    /// mutation queue, recomputes views, then always asks the Remote Store
    /// to restart its streams (which in turn invokes this engine's
    /// `RemoteSyncerDelegate::handle_credential_change` hook).
    pub async fn on_credential_change(&self, user: User) -> FirestoreResult<()> {
        let previous_user = {
            let mut state = self.state.lock().unwrap();
            if state.current_user == user {
                None
            } else {
                Some(std::mem::replace(&mut state.current_user, user.clone()))
            }
        };

        if let Some(previous_user) = previous_user {
            self.callbacks.cancel_pending_writes();
            self.callbacks.abandon_user(&previous_user);
            let changes = self.local_store.handle_user_change(&user).await?;
            self.emit_new_snaps_and_notify_local_store(&changes, None).await?;
        }

        self.remote_store().handle_credential_change().await
    }

    async fn apply_limbo_action(&self, action: LimboTrackerAction) -> FirestoreResult<()> {
        match action {
            LimboTrackerAction::StartListening { target_id, key } => {
                let target = ListenTarget::for_document(
                    &self.serializer,
                    target_id,
                    &key.path().canonical_string(),
                )
                .set_once(true);
                self.remote_store().listen(target).await
            }
            LimboTrackerAction::StopListening { target_id } => {
                self.remote_store().unlisten(target_id).await
            }
        }
    }

    /// `emit_new_snaps_and_notify_local_store`: recomputes every `QueryView`
    /// against `changes`, applies the matching `TargetChange` (if any) from
    /// `remote_event`, drives the resulting limbo deltas through the
    /// `LimboTracker`, delivers the accumulated snapshots as a single batch
    /// and finally reports the views' current document keys back to the
    /// Local Store.
    async fn emit_new_snaps_and_notify_local_store(
        &self,
        changes: &BTreeMap<DocumentKey, MaybeDocument>,
        remote_event: Option<&RemoteEvent>,
    ) -> FirestoreResult<()> {
        let target_ids: Vec<i32> = {
            let state = self.state.lock().unwrap();
            state.query_views.iter().map(|qv| qv.target_id).collect()
        };

        let mut snapshots = Vec::new();
        let mut local_view_changes = Vec::new();

        for target_id in target_ids {
            let query = {
                let state = self.state.lock().unwrap();
                match state.query_views.get_by_target(target_id) {
                    Some(qv) => qv.query.clone(),
                    None => continue,
                }
            };

            let mut doc_changes = {
                let state = self.state.lock().unwrap();
                state
                    .query_views
                    .get_by_target(target_id)
                    .unwrap()
                    .view
                    .compute_doc_changes(changes)
            };

            if doc_changes.needs_refill() {
                let full_result = self.local_store.execute_query(&query).await?;
                let docs = documents_from_result(&full_result);
                let state = self.state.lock().unwrap();
                doc_changes = state
                    .query_views
                    .get_by_target(target_id)
                    .unwrap()
                    .view
                    .compute_doc_changes_from_result(docs);
            }

            let target_change = remote_event.and_then(|event| event.target_changes.get(&target_id));

            let (view_change, local_changes) = {
                let mut state = self.state.lock().unwrap();
                let query_view = state.query_views.get_by_target_mut(target_id).unwrap();
                if let Some(event) = remote_event {
                    if !event.resolved_limbo_documents.is_empty() {
                        query_view
                            .view
                            .purge_resolved_limbo_documents(&event.resolved_limbo_documents);
                    }
                }
                let view_change = query_view.view.apply_changes(doc_changes, target_change);
                let local_changes = query_view.view.keys_for_local_view_changes(target_id);
                (view_change, local_changes)
            };

            let limbo_actions = {
                let mut state = self.state.lock().unwrap();
                state
                    .limbo_tracker
                    .update_tracked_limbo_documents(&view_change.limbo_changes, target_id)
            };
            for action in limbo_actions {
                self.apply_limbo_action(action).await?;
            }

            if let Some((documents, metadata, doc_changes_list)) = view_change.snapshot {
                snapshots.push(ViewSnapshot {
                    query,
                    documents,
                    metadata,
                    doc_changes: doc_changes_list,
                });
            }
            local_view_changes.push(local_changes);
        }

        self.emit_snapshots(snapshots);
        self.local_store.notify_local_view_changes(local_view_changes).await?;
        Ok(())
    }

    fn emit_snapshots(&self, snapshots: Vec<ViewSnapshot>) {
        if snapshots.is_empty() {
            return;
        }
        if let Some(listener) = self.event_listener.lock().unwrap().clone() {
            listener.on_view_snapshots(snapshots);
        }
    }

    fn emit_error(&self, query: Query, error: FirestoreError) {
        if let Some(listener) = self.event_listener.lock().unwrap().clone() {
            listener.on_error(query, error);
        }
    }

    fn emit_online_state_change(&self, state: OnlineState) {
        if let Some(listener) = self.event_listener.lock().unwrap().clone() {
            listener.on_online_state_change(state);
        }
    }
}

/// Whether an error is worth a `warn!` rather than a `debug!`: permission
/// failures and index-related failed-preconditions are actionable by the
/// application author, everything else is routine churn (a rejected limbo
/// listen racing a real delete, a transient write failure).
fn is_interesting_error(error: &FirestoreError) -> bool {
    use crate::firestore::error::FirestoreErrorCode;
    match error.code {
        FirestoreErrorCode::PermissionDenied => true,
        FirestoreErrorCode::FailedPrecondition => error.to_string().to_lowercase().contains("index"),
        _ => false,
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteSyncerDelegate for SyncEngine {
    async fn handle_remote_event(&self, event: RemoteEvent) -> FirestoreResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            for (target_id, change) in &event.target_changes {
                if state.limbo_tracker.key_for_target(*target_id).is_none() {
                    continue;
                }
                let touched =
                    change.added_documents.len() + change.modified_documents.len() + change.removed_documents.len();
                if touched > 1 {
                    return Err(internal_error(format!(
                        "limbo resolution target {target_id} observed more than one document change"
                    )));
                }
                if !change.added_documents.is_empty() {
                    state.limbo_tracker.mark_received_document(*target_id);
                } else if !change.modified_documents.is_empty() {
                    if !state.limbo_tracker.received_document(*target_id).unwrap_or(false) {
                        return Err(internal_error(format!(
                            "limbo resolution target {target_id} modified before it was added"
                        )));
                    }
                } else if !change.removed_documents.is_empty() {
                    if !state.limbo_tracker.received_document(*target_id).unwrap_or(false) {
                        return Err(internal_error(format!(
                            "limbo resolution target {target_id} removed before it was added"
                        )));
                    }
                    state.limbo_tracker.set_received_document(*target_id, false);
                }
            }
        }

        let changes = self.local_store.apply_remote_event(&event).await?;
        self.emit_new_snaps_and_notify_local_store(&changes, Some(&event)).await
    }

    async fn handle_rejected_listen(&self, target_id: i32, error: FirestoreError) -> FirestoreResult<()> {
        let limbo_key = {
            let state = self.state.lock().unwrap();
            state.limbo_tracker.key_for_target(target_id).cloned()
        };

        if let Some(key) = limbo_key {
            {
                let mut state = self.state.lock().unwrap();
                state.limbo_tracker.purge_key(&key);
            }
            let mut synthetic = RemoteEvent::default();
            synthetic.document_updates.insert(key.clone(), None);
            synthetic.resolved_limbo_documents.insert(key);
            return self.handle_remote_event(synthetic).await;
        }

        let query_view = {
            let mut state = self.state.lock().unwrap();
            state.query_views.remove_by_target(target_id)
        };
        let Some(query_view) = query_view else {
            return Err(internal_error(format!(
                "rejected listen for an unknown target {target_id}"
            )));
        };

        let limbo_actions = {
            let mut state = self.state.lock().unwrap();
            state.limbo_tracker.remove_view(target_id)
        };
        for action in limbo_actions {
            self.apply_limbo_action(action).await?;
        }

        self.local_store.release_query(target_id).await?;

        if is_interesting_error(&error) {
            log::warn!(
                "listen rejected for query {}: {error}",
                query_view.query.canonical_id()
            );
        } else {
            log::debug!(
                "listen rejected for query {}: {error}",
                query_view.query.canonical_id()
            );
        }

        self.emit_error(query_view.query, error);
        Ok(())
    }

    async fn handle_successful_write(&self, result: MutationBatchResult) -> FirestoreResult<()> {
        let batch_id = result.batch_id();
        self.callbacks.resolve_batch(batch_id, Ok(()));
        let changes = self.local_store.acknowledge_batch(&result).await?;
        self.emit_new_snaps_and_notify_local_store(&changes, None).await
    }

    async fn handle_failed_write(&self, batch_id: i32, error: FirestoreError) -> FirestoreResult<()> {
        let changes = self.local_store.reject_batch(batch_id).await?;
        if let Some(key) = changes.keys().next() {
            if is_interesting_error(&error) {
                log::warn!("write batch {batch_id} rejected (first affected key {key:?}): {error}");
            } else {
                log::debug!("write batch {batch_id} rejected (first affected key {key:?}): {error}");
            }
        }
        self.callbacks.resolve_batch(batch_id, Err(error));
        self.emit_new_snaps_and_notify_local_store(&changes, None).await
    }

    fn handle_online_state_change(&self, state: OnlineState) {
        let mut snapshots = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            for query_view in guard.query_views.iter_mut() {
                let view_change = query_view.view.apply_online_state_change(state);
                debug_assert!(
                    view_change.limbo_changes.is_empty(),
                    "an online-state transition must never produce limbo changes"
                );
                if let Some((documents, metadata, doc_changes)) = view_change.snapshot {
                    snapshots.push(ViewSnapshot {
                        query: query_view.query.clone(),
                        documents,
                        metadata,
                        doc_changes,
                    });
                }
            }
        }
        self.emit_snapshots(snapshots);
        self.emit_online_state_change(state);
    }

    /// Delegates to the inherent `SyncEngine::get_remote_keys_for_target`
    /// (§4.1), the actual answer the watch-change aggregator consults through
    /// `RemoteSyncerBridge::get_remote_keys_for_target`.
    fn get_remote_keys_for_target(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        SyncEngine::get_remote_keys_for_target(self, target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::Firestore;
    use crate::firestore::model::{DatabaseId, ResourcePath};
    use crate::firestore::remote::remote_event::TargetChange;
    use crate::firestore::remote::watch_change::WatchDocument;
    use crate::firestore::remote::NoopTokenProvider;
    use crate::firestore::remote::{
        InMemoryTransport, MultiplexedConnection, StreamingDatastore, StreamingDatastoreImpl,
        TokenProviderArc,
    };
    use crate::firestore::value::MapValue;
    use crate::test_support::firebase::test_firebase_app_with_api_key;
    use std::sync::Mutex as StdTestMutex;

    use super::super::memory::MemoryLocalStore;

    fn sample_network() -> (NetworkLayer, JsonProtoSerializer, Arc<MultiplexedConnection>) {
        let (client_transport, server_transport) = InMemoryTransport::pair();
        let client_connection = Arc::new(MultiplexedConnection::new(client_transport));
        let server_connection = Arc::new(MultiplexedConnection::new(server_transport));
        let datastore = StreamingDatastoreImpl::new(Arc::clone(&client_connection));
        let datastore: Arc<dyn StreamingDatastore> = Arc::new(datastore);
        let token_provider: TokenProviderArc = Arc::new(NoopTokenProvider::default());
        let network = NetworkLayer::builder(datastore, token_provider).build();
        let serializer = JsonProtoSerializer::new(DatabaseId::new("test", "(default)"));
        (network, serializer, server_connection)
    }

    fn build_query() -> Query {
        let app = test_firebase_app_with_api_key("sync-engine-query");
        let firestore = Firestore::new(app, DatabaseId::new("test", "(default)"));
        let path = ResourcePath::from_string("cities").expect("collection path");
        Query::new(firestore, path).expect("query")
    }

    fn build_engine() -> (Arc<SyncEngine>, JsonProtoSerializer) {
        let local_store: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
        let (network, serializer, _server_connection) = sample_network();
        let engine = SyncEngine::new(local_store, serializer.clone());
        let firestore = Firestore::new(
            test_firebase_app_with_api_key("sync-engine-transactions"),
            DatabaseId::new("test", "(default)"),
        );
        let datastore: Arc<dyn crate::firestore::remote::Datastore> =
            Arc::new(crate::firestore::remote::InMemoryDatastore::new());
        engine.attach_remote_store(network, Some((firestore, datastore)));
        (engine, serializer)
    }

    #[derive(Default)]
    struct RecordingListener {
        snapshots: StdTestMutex<Vec<ViewSnapshot>>,
        online_states: StdTestMutex<Vec<OnlineState>>,
        errors: StdTestMutex<Vec<FirestoreError>>,
    }

    impl SyncEventListener for RecordingListener {
        fn on_view_snapshots(&self, snapshots: Vec<ViewSnapshot>) {
            self.snapshots.lock().unwrap().extend(snapshots);
        }

        fn on_error(&self, _query: Query, error: FirestoreError) {
            self.errors.lock().unwrap().push(error);
        }

        fn on_online_state_change(&self, state: OnlineState) {
            self.online_states.lock().unwrap().push(state);
        }
    }

    fn target_change_current_with_added(keys: &[&DocumentKey]) -> TargetChange {
        let mut change = TargetChange::default();
        for key in keys {
            change.added_documents.insert((*key).clone());
        }
        change.current = true;
        change
    }

    #[tokio::test]
    async fn listen_rejects_a_duplicate_query() {
        let (engine, _serializer) = build_engine();
        let query = build_query();
        engine.listen(query.clone()).await.expect("first listen");
        assert!(engine.listen(query).await.is_err());
    }

    #[tokio::test]
    async fn listen_then_remote_event_emits_a_snapshot() {
        let (engine, serializer) = build_engine();
        let listener = Arc::new(RecordingListener::default());
        engine.set_event_listener(listener.clone());

        let query = build_query();
        let target_id = engine.listen(query).await.expect("listen");

        let key = DocumentKey::from_string("cities/sf").unwrap();
        let mut change = TargetChange::default();
        change.added_documents.insert(key.clone());
        change.current = true;

        let mut event = RemoteEvent::default();
        event.target_changes.insert(target_id, change);
        event.document_updates.insert(
            key.clone(),
            Some(WatchDocument {
                key: key.clone(),
                fields: MapValue::new(Default::default()),
                update_time: None,
                create_time: None,
            }),
        );

        engine.handle_remote_event(event).await.expect("remote event");

        let snapshots = listener.snapshots.lock().unwrap();
        assert!(!snapshots.is_empty());
        assert_eq!(snapshots.last().unwrap().documents.len(), 1);
        let _ = &serializer;
    }

    #[tokio::test]
    async fn stop_listening_releases_the_local_allocation() {
        let (engine, _serializer) = build_engine();
        let query = build_query();
        engine.listen(query.clone()).await.expect("listen");
        engine.stop_listening(&query).await.expect("stop listening");
        assert!(engine.stop_listening(&query).await.is_err());
    }

    #[tokio::test]
    async fn write_mutations_resolves_its_completion_on_acknowledgment() {
        let (engine, _serializer) = build_engine();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let write = WriteOperation::Set {
            key: key.clone(),
            data: MapValue::new(Default::default()),
            mask: None,
            transforms: Vec::new(),
        };

        let completion = engine
            .write_mutations(vec![write], User::unauthenticated())
            .await
            .expect("write_mutations");

        let batch_id = engine
            .local_store
            .get_highest_unacknowledged_batch_id()
            .await
            .unwrap()
            .expect("an unacknowledged batch");

        let result = MutationBatchResult::from(
            crate::firestore::remote::mutation::MutationBatch::from_writes(
                batch_id,
                crate::firestore::model::Timestamp::now(),
                vec![WriteOperation::Set {
                    key,
                    data: MapValue::new(Default::default()),
                    mask: None,
                    transforms: Vec::new(),
                }],
            ),
            None,
            vec![crate::firestore::remote::streams::write::WriteResult {
                update_time: None,
                transform_results: Vec::new(),
            }],
        )
        .unwrap();

        engine.handle_successful_write(result).await.expect("ack");
        completion.wait().await.expect("resolved");
    }

    #[tokio::test]
    async fn pending_writes_task_completes_immediately_when_queue_is_empty() {
        let (engine, _serializer) = build_engine();
        let completion = engine.register_pending_writes_task().await.expect("register");
        completion.wait().await.expect("resolved immediately");
    }

    #[tokio::test]
    async fn credential_change_cancels_pending_writes_for_the_old_user() {
        let (engine, _serializer) = build_engine();
        let alice = User::new("alice");
        engine.on_credential_change(alice.clone()).await.expect("first change");

        let pending = engine.register_pending_writes_task().await;
        // Queue is empty so this resolves immediately; the cancellation path
        // is exercised directly against the registry in mutation_callbacks.rs.
        assert!(pending.is_ok());

        engine
            .on_credential_change(User::new("bob"))
            .await
            .expect("second change");
    }

    #[tokio::test]
    async fn limbo_document_is_discovered_and_then_resolved() {
        let (engine, _serializer) = build_engine();
        let listener = Arc::new(RecordingListener::default());
        engine.set_event_listener(listener.clone());

        let query = build_query();
        let target_id = engine.listen(query).await.expect("listen");

        let key = DocumentKey::from_string("cities/x").unwrap();
        let mut event = RemoteEvent::default();
        event
            .target_changes
            .insert(target_id, target_change_current_with_added(&[&key]));
        engine.handle_remote_event(event).await.expect("remote event reports x as synced but absent");

        // The view has no local copy of `x`, so it must have gone to limbo
        // and a resolution target must have been allocated for it.
        let limbo_target_id = {
            let state = engine.state.lock().unwrap();
            state
                .limbo_tracker
                .target_for_key(&key)
                .expect("x should be tracked as a limbo document")
        };
        assert_ne!(limbo_target_id, target_id);

        // The limbo resolution listen now reports the document as present.
        let mut resolution = RemoteEvent::default();
        resolution
            .target_changes
            .insert(limbo_target_id, target_change_current_with_added(&[&key]));
        resolution.document_updates.insert(
            key.clone(),
            Some(WatchDocument {
                key: key.clone(),
                fields: MapValue::new(Default::default()),
                update_time: None,
                create_time: None,
            }),
        );
        engine.handle_remote_event(resolution).await.expect("limbo resolution event");

        let state = engine.state.lock().unwrap();
        assert!(
            state.limbo_tracker.target_for_key(&key).is_none(),
            "resolving the limbo document should free its resolution target"
        );
        drop(state);

        let snapshots = listener.snapshots.lock().unwrap();
        let last = snapshots.last().expect("a snapshot for the resolved document");
        assert_eq!(last.documents.len(), 1);
        assert_eq!(last.documents[0].document_key(), &key);
    }

    #[tokio::test]
    async fn rejected_limbo_listen_purges_the_document_without_surfacing_an_error() {
        let (engine, _serializer) = build_engine();
        let listener = Arc::new(RecordingListener::default());
        engine.set_event_listener(listener.clone());

        let query = build_query();
        let target_id = engine.listen(query).await.expect("listen");

        let key = DocumentKey::from_string("cities/x").unwrap();
        let mut event = RemoteEvent::default();
        event
            .target_changes
            .insert(target_id, target_change_current_with_added(&[&key]));
        engine.handle_remote_event(event).await.expect("remote event reports x as synced but absent");

        let limbo_target_id = {
            let state = engine.state.lock().unwrap();
            state
                .limbo_tracker
                .target_for_key(&key)
                .expect("x should be tracked as a limbo document")
        };

        engine
            .handle_rejected_listen(limbo_target_id, crate::firestore::error::permission_denied("nope"))
            .await
            .expect("rejected limbo listen is handled, not surfaced as an error");

        let state = engine.state.lock().unwrap();
        assert!(
            state.limbo_tracker.target_for_key(&key).is_none(),
            "a rejected limbo listen must purge the document from tracking"
        );
        drop(state);

        assert!(
            listener.errors.lock().unwrap().is_empty(),
            "the user's own listen is unaffected by a rejected limbo resolution"
        );
    }

    #[tokio::test]
    async fn transaction_retries_the_update_function_until_it_succeeds() {
        use crate::firestore::remote::box_remote_store_future;
        use std::sync::atomic::{AtomicU32, Ordering};

        let (engine, _serializer) = build_engine();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = engine
            .transaction(2, |_txn| {
                let attempts = Arc::clone(&attempts);
                box_remote_store_future(async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(crate::firestore::error::aborted("contended"))
                    } else {
                        Ok(attempt)
                    }
                })
            })
            .await
            .expect("should eventually succeed within the retry budget");

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transaction_surfaces_the_error_once_retries_are_exhausted() {
        use crate::firestore::remote::box_remote_store_future;
        use std::sync::atomic::{AtomicU32, Ordering};

        let (engine, _serializer) = build_engine();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = engine
            .transaction(1, |_txn| {
                let attempts = Arc::clone(&attempts);
                box_remote_store_future(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(crate::firestore::error::aborted("still contended"))
                })
            })
            .await;

        assert!(result.is_err());
        // retries = 1 budgets exactly one retry on top of the first attempt.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn online_state_change_never_surfaces_limbo_changes() {
        let (engine, _serializer) = build_engine();
        let listener = Arc::new(RecordingListener::default());
        engine.set_event_listener(listener.clone());

        let query = build_query();
        engine.listen(query).await.expect("listen");

        engine.handle_online_state_change(OnlineState::Offline);
        assert_eq!(listener.online_states.lock().unwrap().as_slice(), &[OnlineState::Offline]);
    }
}
