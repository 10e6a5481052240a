use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_lock::Mutex;
use async_trait::async_trait;

#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
use base64::Engine;
#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
use serde_json::{json, Value};

use crate::firestore::api::Query;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::local::local_store::{
    BatchId, LocalStore, LocalViewChanges, LocalWriteResult, QueryData, QueryPurpose,
};
use crate::firestore::local::overlay::apply_document_overlays;
use crate::firestore::local::target_id_generator::TargetIdGenerator;
use crate::firestore::model::{DocumentKey, MaybeDocument, Timestamp, User};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::remote::mutation::{MutationBatch, MutationBatchResult};
use crate::firestore::remote::remote_event::RemoteEvent;

#[derive(Clone, Debug, Default)]
pub struct TargetMetadataSnapshot {
    pub target_id: i32,
    pub resume_token: Option<Vec<u8>>,
    pub snapshot_version: Option<Timestamp>,
    pub current: bool,
    pub remote_keys: BTreeSet<DocumentKey>,
}

impl TargetMetadataSnapshot {
    pub fn new(target_id: i32) -> Self {
        Self {
            target_id,
            resume_token: None,
            snapshot_version: None,
            current: false,
            remote_keys: BTreeSet::new(),
        }
    }
}

pub trait LocalStorePersistence: Send + Sync {
    fn save_target_metadata(&self, _snapshot: TargetMetadataSnapshot) {}
    fn clear_target_metadata(&self, _target_id: i32) {}
    fn save_document_overlay(&self, _key: &DocumentKey, _overlay: &[WriteOperation]) {}
    fn clear_document_overlay(&self, _key: &DocumentKey) {}
    fn schedule_initial_load(&self, _store: Arc<MemoryLocalStore>) {}
}

/// In-memory persistent cache and mutation queue backing a [`super::sync_engine::SyncEngine`].
///
/// Mirrors the responsibilities of the Firestore JS `LocalStore`/`MemoryPersistence`
/// pair: it owns the confirmed remote document cache, per-target watch metadata
/// (resume tokens, snapshot versions, remote key sets), and the outstanding
/// mutation queue with its per-document overlays. It knows nothing about query
/// views, limbo documents, or application listeners — that reconciliation lives
/// one layer up, in the Sync Engine.
pub struct MemoryLocalStore {
    documents: Mutex<BTreeMap<DocumentKey, MaybeDocument>>,
    overlays: Mutex<BTreeMap<DocumentKey, Vec<(BatchId, WriteOperation)>>>,
    mutation_queue: Mutex<BTreeMap<BatchId, MutationBatch>>,
    next_batch_id: AtomicI32,
    target_ids: TargetIdGenerator,
    sequence_counter: AtomicU64,

    queries_by_canonical_id: StdMutex<BTreeMap<String, i32>>,
    target_metadata: StdMutex<BTreeMap<i32, TargetMetadataSnapshot>>,
    view_references: StdMutex<BTreeMap<i32, BTreeSet<DocumentKey>>>,
    current_user: StdMutex<User>,
    persistence: Option<Arc<dyn LocalStorePersistence>>,
}

impl Debug for MemoryLocalStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLocalStore").finish()
    }
}

impl MemoryLocalStore {
    fn new_internal(persistence: Option<Arc<dyn LocalStorePersistence>>) -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            overlays: Mutex::new(BTreeMap::new()),
            mutation_queue: Mutex::new(BTreeMap::new()),
            next_batch_id: AtomicI32::new(1),
            target_ids: TargetIdGenerator::for_local_store(),
            sequence_counter: AtomicU64::new(1),
            queries_by_canonical_id: StdMutex::new(BTreeMap::new()),
            target_metadata: StdMutex::new(BTreeMap::new()),
            view_references: StdMutex::new(BTreeMap::new()),
            current_user: StdMutex::new(User::unauthenticated()),
            persistence,
        }
    }

    pub fn new() -> Self {
        Self::new_internal(None)
    }

    pub fn with_persistence(persistence: Arc<dyn LocalStorePersistence>) -> Arc<Self> {
        let store =
            Arc::new(Self::new_internal(Some(Arc::clone(&persistence)))) as Arc<MemoryLocalStore>;
        persistence.schedule_initial_load(Arc::clone(&store));
        store
    }

    #[cfg(all(
        feature = "wasm-web",
        feature = "experimental-indexed-db",
        target_arch = "wasm32"
    ))]
    pub fn new_with_indexed_db(db_name: impl Into<String>) -> Arc<Self> {
        let persistence = Arc::new(IndexedDbPersistence::new(db_name));
        Self::with_persistence(persistence)
    }

    /// Merges the confirmed remote document (if any) for `key` with its
    /// outstanding overlay writes, producing the latency-compensated view a
    /// `View` should see.
    async fn document_with_overlay(&self, key: &DocumentKey) -> FirestoreResult<Option<MaybeDocument>> {
        let base_version = {
            let documents = self.documents.lock().await;
            documents.get(key).map(|doc| *doc.version())
        };

        let overlay_ops = {
            let overlays = self.overlays.lock().await;
            overlays.get(key).cloned()
        };

        let base_data = {
            let documents = self.documents.lock().await;
            documents.get(key).and_then(|doc| doc.data().cloned())
        };

        let merged = match overlay_ops {
            Some(ops) if !ops.is_empty() => {
                let writes: Vec<WriteOperation> = ops.into_iter().map(|(_, write)| write).collect();
                apply_document_overlays(base_data, &writes)?
            }
            _ => base_data,
        };

        let version = base_version.unwrap_or_else(|| Timestamp::new(0, 0));
        Ok(merged.map(|data| MaybeDocument::Document {
            key: key.clone(),
            version,
            data,
        }))
    }

    async fn changes_for_keys(
        &self,
        keys: impl IntoIterator<Item = DocumentKey>,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        let mut changes = BTreeMap::new();
        for key in keys {
            match self.document_with_overlay(&key).await? {
                Some(doc) => {
                    changes.insert(key, doc);
                }
                None => {
                    changes.insert(key.clone(), MaybeDocument::synthetic_no_document(key));
                }
            }
        }
        Ok(changes)
    }

    fn persist_target(&self, snapshot: TargetMetadataSnapshot) {
        if let Some(persistence) = &self.persistence {
            persistence.save_target_metadata(snapshot);
        }
    }

    fn persist_overlay(&self, key: &DocumentKey, ops: &[(BatchId, WriteOperation)]) {
        if let Some(persistence) = &self.persistence {
            if ops.is_empty() {
                persistence.clear_document_overlay(key);
            } else {
                let writes: Vec<WriteOperation> = ops.iter().map(|(_, write)| write.clone()).collect();
                persistence.save_document_overlay(key, &writes);
            }
        }
    }

    pub fn target_metadata_snapshot(&self, target_id: i32) -> Option<TargetMetadataSnapshot> {
        self.target_metadata.lock().unwrap().get(&target_id).cloned()
    }

    pub fn target_metadata_map(&self) -> BTreeMap<i32, TargetMetadataSnapshot> {
        self.target_metadata.lock().unwrap().clone()
    }

    pub fn restore_target_snapshot(&self, snapshot: TargetMetadataSnapshot) {
        self.target_metadata.lock().unwrap().insert(snapshot.target_id, snapshot);
    }

    pub async fn restore_overlay_key(&self, key: DocumentKey) {
        self.overlays.lock().await.entry(key).or_insert_with(Vec::new);
    }

    pub async fn outstanding_batch_ids(&self) -> Vec<BatchId> {
        self.mutation_queue.lock().await.keys().copied().collect()
    }

    pub async fn overlay_keys(&self) -> BTreeSet<DocumentKey> {
        self.overlays.lock().await.keys().cloned().collect()
    }

    pub async fn document(&self, key: &DocumentKey) -> Option<MaybeDocument> {
        self.documents.lock().await.get(key).cloned()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl LocalStore for MemoryLocalStore {
    async fn allocate_query(&self, query: &Query) -> FirestoreResult<QueryData> {
        let canonical_id = query.canonical_id();
        let existing_target = {
            let guard = self.queries_by_canonical_id.lock().unwrap();
            guard.get(&canonical_id).copied()
        };

        let target_id = match existing_target {
            Some(target_id) => target_id,
            None => {
                let target_id = self.target_ids.next();
                self.queries_by_canonical_id
                    .lock()
                    .unwrap()
                    .insert(canonical_id, target_id);

                let is_new = {
                    let mut targets = self.target_metadata.lock().unwrap();
                    let is_new = !targets.contains_key(&target_id);
                    targets
                        .entry(target_id)
                        .or_insert_with(|| TargetMetadataSnapshot::new(target_id));
                    is_new
                };
                if is_new {
                    self.persist_target(TargetMetadataSnapshot::new(target_id));
                }
                target_id
            }
        };

        let sequence_number = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
        Ok(QueryData::new(query.clone(), target_id, sequence_number, QueryPurpose::Listen))
    }

    async fn release_query(&self, target_id: i32) -> FirestoreResult<()> {
        {
            let mut by_query = self.queries_by_canonical_id.lock().unwrap();
            by_query.retain(|_, id| *id != target_id);
        }
        self.target_metadata.lock().unwrap().remove(&target_id);
        self.view_references.lock().unwrap().remove(&target_id);
        if let Some(persistence) = &self.persistence {
            persistence.clear_target_metadata(target_id);
        }
        Ok(())
    }

    async fn execute_query(
        &self,
        query: &Query,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        let definition = query.definition();
        let candidate_keys: BTreeSet<DocumentKey> = {
            let documents = self.documents.lock().await;
            let overlays = self.overlays.lock().await;
            documents
                .keys()
                .chain(overlays.keys())
                .filter(|key| definition.matches_collection(key))
                .cloned()
                .collect()
        };

        let mut result = BTreeMap::new();
        for key in candidate_keys {
            if let Some(doc) = self.document_with_overlay(&key).await? {
                result.insert(key, doc);
            }
        }
        Ok(result)
    }

    async fn get_remote_document_keys(&self, target_id: i32) -> FirestoreResult<BTreeSet<DocumentKey>> {
        Ok(self
            .target_metadata
            .lock()
            .unwrap()
            .get(&target_id)
            .map(|snapshot| snapshot.remote_keys.clone())
            .unwrap_or_default())
    }

    async fn write_locally(
        &self,
        _user: &User,
        writes: Vec<WriteOperation>,
    ) -> FirestoreResult<LocalWriteResult> {
        if writes.is_empty() {
            return Err(invalid_argument("mutation batch must contain at least one write"));
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        let batch = MutationBatch::from_writes(batch_id, Timestamp::now(), writes);
        self.mutation_queue.lock().await.insert(batch_id, batch.clone());

        let mut touched_keys = Vec::new();
        {
            let mut overlays = self.overlays.lock().await;
            for write in &batch.writes {
                let key = write.key().clone();
                let entry = overlays.entry(key.clone()).or_default();
                entry.push((batch_id, write.clone()));
                touched_keys.push((key, entry.clone()));
            }
        }

        for (key, ops) in &touched_keys {
            self.persist_overlay(key, ops);
        }

        let keys: Vec<DocumentKey> = touched_keys.into_iter().map(|(key, _)| key).collect();
        let changes = self.changes_for_keys(keys).await?;
        Ok(LocalWriteResult { batch_id, changes })
    }

    async fn apply_remote_event(
        &self,
        event: &RemoteEvent,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        {
            let mut documents = self.documents.lock().await;
            for (key, maybe_doc) in &event.document_updates {
                match maybe_doc {
                    Some(watch_doc) => {
                        let version = watch_doc
                            .update_time
                            .or(event.snapshot_version)
                            .unwrap_or_else(|| Timestamp::new(0, 0));
                        documents.insert(
                            key.clone(),
                            MaybeDocument::Document {
                                key: key.clone(),
                                version,
                                data: watch_doc.fields.clone(),
                            },
                        );
                    }
                    None => {
                        let version = event.snapshot_version.unwrap_or_else(|| Timestamp::new(0, 0));
                        documents.insert(
                            key.clone(),
                            MaybeDocument::NoDocument {
                                key: key.clone(),
                                version,
                                has_committed_mutations: false,
                            },
                        );
                    }
                }
            }
        }

        if let Some(snapshot_version) = event.snapshot_version {
            let mut pending = Vec::new();
            {
                let mut targets = self.target_metadata.lock().unwrap();
                for (target_id, change) in &event.target_changes {
                    let entry = targets
                        .entry(*target_id)
                        .or_insert_with(|| TargetMetadataSnapshot::new(*target_id));
                    if let Some(token) = &change.resume_token {
                        if !token.is_empty() {
                            entry.resume_token = Some(token.clone());
                        }
                    }
                    entry.snapshot_version = Some(snapshot_version);
                    if change.current {
                        entry.current = true;
                    }
                    for key in &change.removed_documents {
                        entry.remote_keys.remove(key);
                    }
                    for key in change.added_documents.iter().chain(change.modified_documents.iter()) {
                        entry.remote_keys.insert(key.clone());
                    }
                    pending.push(entry.clone());
                }
            }
            for snapshot in pending {
                self.persist_target(snapshot);
            }
        }

        for target_id in &event.target_resets {
            let snapshot = {
                let mut targets = self.target_metadata.lock().unwrap();
                let entry = targets
                    .entry(*target_id)
                    .or_insert_with(|| TargetMetadataSnapshot::new(*target_id));
                entry.remote_keys.clear();
                entry.resume_token = None;
                entry.snapshot_version = None;
                entry.current = false;
                entry.clone()
            };
            if let Some(persistence) = &self.persistence {
                persistence.clear_target_metadata(*target_id);
            }
            self.persist_target(snapshot);
        }

        self.changes_for_keys(event.document_updates.keys().cloned()).await
    }

    async fn acknowledge_batch(
        &self,
        result: &MutationBatchResult,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        self.mutation_queue.lock().await.remove(&result.batch_id);

        let mut touched = Vec::new();
        {
            let mut overlays = self.overlays.lock().await;
            for key in &result.keys {
                if let Some(ops) = overlays.get_mut(key) {
                    ops.retain(|(batch_id, _)| *batch_id != result.batch_id);
                    let remaining = ops.clone();
                    if remaining.is_empty() {
                        overlays.remove(key);
                    }
                    touched.push((key.clone(), remaining));
                }
            }
        }
        for (key, ops) in &touched {
            self.persist_overlay(key, ops);
        }

        self.changes_for_keys(result.keys.iter().cloned()).await
    }

    async fn reject_batch(
        &self,
        batch_id: BatchId,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        let batch = self.mutation_queue.lock().await.remove(&batch_id);
        let keys = match &batch {
            Some(batch) => batch.keys(),
            None => BTreeSet::new(),
        };

        let mut touched = Vec::new();
        {
            let mut overlays = self.overlays.lock().await;
            for key in &keys {
                if let Some(ops) = overlays.get_mut(key) {
                    ops.retain(|(id, _)| *id != batch_id);
                    let remaining = ops.clone();
                    if remaining.is_empty() {
                        overlays.remove(key);
                    }
                    touched.push((key.clone(), remaining));
                }
            }
        }
        for (key, ops) in &touched {
            self.persist_overlay(key, ops);
        }

        self.changes_for_keys(keys).await
    }

    async fn notify_local_view_changes(&self, changes: Vec<LocalViewChanges>) -> FirestoreResult<()> {
        let mut guard = self.view_references.lock().unwrap();
        for change in changes {
            let entry = guard.entry(change.target_id).or_default();
            for key in change.removed_keys {
                entry.remove(&key);
            }
            for key in change.added_keys {
                entry.insert(key);
            }
        }
        Ok(())
    }

    async fn get_highest_unacknowledged_batch_id(&self) -> FirestoreResult<Option<BatchId>> {
        Ok(self.mutation_queue.lock().await.keys().next_back().copied())
    }

    async fn handle_user_change(
        &self,
        user: &User,
    ) -> FirestoreResult<BTreeMap<DocumentKey, MaybeDocument>> {
        let changed = {
            let mut current = self.current_user.lock().unwrap();
            if *current == *user {
                false
            } else {
                *current = user.clone();
                true
            }
        };

        if !changed {
            return Ok(BTreeMap::new());
        }

        let stale_keys: Vec<DocumentKey> = {
            let mut overlays = self.overlays.lock().await;
            let keys = overlays.keys().cloned().collect::<Vec<_>>();
            overlays.clear();
            keys
        };
        self.mutation_queue.lock().await.clear();

        if let Some(persistence) = &self.persistence {
            for key in &stale_keys {
                persistence.clear_document_overlay(key);
            }
        }

        self.changes_for_keys(stale_keys).await
    }
}

#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
#[derive(Clone, Debug)]
struct IndexedDbPersistence {
    db_name: String,
    targets_store: String,
    overlays_store: String,
    version: u32,
}

#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
const TARGETS_CATALOG_KEY: &str = "__targets_catalog__";
#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
const OVERLAYS_CATALOG_KEY: &str = "__overlays_catalog__";

#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
impl IndexedDbPersistence {
    fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            targets_store: "firestore_targets".into(),
            overlays_store: "firestore_overlays".into(),
            version: 1,
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        wasm_bindgen_futures::spawn_local(future);
    }

    fn encode_target_snapshot(snapshot: &TargetMetadataSnapshot) -> String {
        let resume_token = snapshot
            .resume_token
            .as_ref()
            .map(|token| base64::engine::general_purpose::STANDARD.encode(token));
        let remote_keys: Vec<String> = snapshot
            .remote_keys
            .iter()
            .map(|key| key.path().canonical_string())
            .collect();
        let snapshot_version = snapshot.snapshot_version.map(|ts| {
            json!({
                "seconds": ts.seconds,
                "nanos": ts.nanos,
            })
        });

        json!({
            "targetId": snapshot.target_id,
            "resumeToken": resume_token,
            "snapshotVersion": snapshot_version,
            "current": snapshot.current,
            "remoteKeys": remote_keys,
        })
        .to_string()
    }

    fn encode_overlay(key: &DocumentKey, overlay: &[WriteOperation]) -> String {
        let write_paths: Vec<String> = overlay
            .iter()
            .map(|write| write.key().path().canonical_string())
            .collect();
        json!({
            "key": key.path().canonical_string(),
            "writes": write_paths,
        })
        .to_string()
    }

    async fn get_catalog(
        db: &web_sys::IdbDatabase,
        store: &str,
        catalog_key: &str,
    ) -> crate::platform::browser::indexed_db::IndexedDbResult<BTreeSet<String>> {
        let existing =
            crate::platform::browser::indexed_db::get_string(db, store, catalog_key).await?;
        if let Some(json) = existing {
            let parsed: Value = serde_json::from_str(&json).unwrap_or_else(|_| json!([]));
            if let Some(array) = parsed.as_array() {
                let entries = array
                    .iter()
                    .filter_map(|value| value.as_str().map(|s| s.to_string()))
                    .collect();
                Ok(entries)
            } else {
                Ok(BTreeSet::new())
            }
        } else {
            Ok(BTreeSet::new())
        }
    }

    async fn save_catalog(
        db: &web_sys::IdbDatabase,
        store: &str,
        catalog_key: &str,
        entries: &BTreeSet<String>,
    ) -> crate::platform::browser::indexed_db::IndexedDbResult<()> {
        let payload = json!(entries.iter().collect::<Vec<_>>()).to_string();
        crate::platform::browser::indexed_db::put_string(db, store, catalog_key, &payload).await
    }

    fn decode_target_snapshot(payload: &str) -> Option<TargetMetadataSnapshot> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let target_id = value.get("targetId")?.as_i64()? as i32;
        let resume_token = value
            .get("resumeToken")
            .and_then(Value::as_str)
            .and_then(|token| base64::engine::general_purpose::STANDARD.decode(token).ok());
        let snapshot_version = value.get("snapshotVersion").and_then(|json| {
            let seconds = json.get("seconds")?.as_i64()?;
            let nanos = json.get("nanos")?.as_i64()? as i32;
            Some(Timestamp::new(seconds, nanos))
        });
        let current = value
            .get("current")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let remote_keys = value
            .get("remoteKeys")
            .and_then(Value::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .as_str()
                            .and_then(|path| DocumentKey::from_string(path).ok())
                    })
                    .collect::<BTreeSet<_>>()
            })
            .unwrap_or_default();

        Some(TargetMetadataSnapshot {
            target_id,
            resume_token,
            snapshot_version,
            current,
            remote_keys,
        })
    }

    fn decode_overlay(payload: &str) -> Option<DocumentKey> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let key_path = value.get("key")?.as_str()?;
        DocumentKey::from_string(key_path).ok()
    }

    fn schedule_initial_load_internal(&self, store: Arc<MemoryLocalStore>) {
        let db_name = self.db_name.clone();
        let targets_store = self.targets_store.clone();
        let overlays_store = self.overlays_store.clone();
        let version = self.version;

        self.spawn(async move {
            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name,
                version,
                &targets_store,
            )
            .await
            {
                if let Ok(catalog) =
                    Self::get_catalog(&db, &targets_store, TARGETS_CATALOG_KEY).await
                {
                    for target_key in catalog {
                        if let Ok(Some(payload)) = crate::platform::browser::indexed_db::get_string(
                            &db,
                            &targets_store,
                            &target_key,
                        )
                        .await
                        {
                            if let Some(snapshot) = Self::decode_target_snapshot(&payload) {
                                store.restore_target_snapshot(snapshot);
                            }
                        }
                    }
                }
            }

            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name,
                version,
                &overlays_store,
            )
            .await
            {
                if let Ok(catalog) =
                    Self::get_catalog(&db, &overlays_store, OVERLAYS_CATALOG_KEY).await
                {
                    for key_path in catalog {
                        if let Ok(Some(payload)) = crate::platform::browser::indexed_db::get_string(
                            &db,
                            &overlays_store,
                            &key_path,
                        )
                        .await
                        {
                            if let Some(key) = Self::decode_overlay(&payload) {
                                store.restore_overlay_key(key).await;
                            }
                        }
                    }
                }
            }
        });
    }
}

#[cfg(all(
    feature = "wasm-web",
    feature = "experimental-indexed-db",
    target_arch = "wasm32"
))]
impl LocalStorePersistence for IndexedDbPersistence {
    fn save_target_metadata(&self, snapshot: TargetMetadataSnapshot) {
        let store = self.targets_store.clone();
        let db_name = self.db_name.clone();
        let version = self.version;
        let payload = Self::encode_target_snapshot(&snapshot);
        let key = snapshot.target_id.to_string();
        self.spawn(async move {
            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name, version, &store,
            )
            .await
            {
                let _ =
                    crate::platform::browser::indexed_db::put_string(&db, &store, &key, &payload)
                        .await;
                if let Ok(mut catalog) = Self::get_catalog(&db, &store, TARGETS_CATALOG_KEY).await {
                    if catalog.insert(key.clone()) {
                        let _ =
                            Self::save_catalog(&db, &store, TARGETS_CATALOG_KEY, &catalog).await;
                    }
                }
            }
        });
    }

    fn clear_target_metadata(&self, target_id: i32) {
        let store = self.targets_store.clone();
        let db_name = self.db_name.clone();
        let version = self.version;
        let key = target_id.to_string();
        self.spawn(async move {
            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name, version, &store,
            )
            .await
            {
                let _ = crate::platform::browser::indexed_db::delete_key(&db, &store, &key).await;
                if let Ok(mut catalog) = Self::get_catalog(&db, &store, TARGETS_CATALOG_KEY).await {
                    if catalog.remove(&key) {
                        let _ =
                            Self::save_catalog(&db, &store, TARGETS_CATALOG_KEY, &catalog).await;
                    }
                }
            }
        });
    }

    fn save_document_overlay(&self, key: &DocumentKey, overlay: &[WriteOperation]) {
        let store = self.overlays_store.clone();
        let db_name = self.db_name.clone();
        let version = self.version;
        let key_path = key.path().canonical_string();
        let payload = Self::encode_overlay(key, overlay);
        self.spawn(async move {
            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name, version, &store,
            )
            .await
            {
                let _ = crate::platform::browser::indexed_db::put_string(
                    &db, &store, &key_path, &payload,
                )
                .await;
                if let Ok(mut catalog) = Self::get_catalog(&db, &store, OVERLAYS_CATALOG_KEY).await
                {
                    if catalog.insert(key_path.clone()) {
                        let _ =
                            Self::save_catalog(&db, &store, OVERLAYS_CATALOG_KEY, &catalog).await;
                    }
                }
            }
        });
    }

    fn clear_document_overlay(&self, key: &DocumentKey) {
        let store = self.overlays_store.clone();
        let db_name = self.db_name.clone();
        let version = self.version;
        let key_path = key.path().canonical_string();
        self.spawn(async move {
            if let Ok(db) = crate::platform::browser::indexed_db::open_database_with_store(
                &db_name, version, &store,
            )
            .await
            {
                let _ =
                    crate::platform::browser::indexed_db::delete_key(&db, &store, &key_path).await;
                if let Ok(mut catalog) = Self::get_catalog(&db, &store, OVERLAYS_CATALOG_KEY).await
                {
                    if catalog.remove(&key_path) {
                        let _ =
                            Self::save_catalog(&db, &store, OVERLAYS_CATALOG_KEY, &catalog).await;
                    }
                }
            }
        });
    }

    fn schedule_initial_load(&self, store: Arc<MemoryLocalStore>) {
        self.schedule_initial_load_internal(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::Firestore;
    use crate::firestore::model::{DatabaseId, ResourcePath};
    use crate::test_support::firebase::test_firebase_app_with_api_key;

    fn sample_query() -> Query {
        let app = test_firebase_app_with_api_key("memory-local-store");
        let firestore = Firestore::new(app, DatabaseId::new("test", "(default)"));
        let path = ResourcePath::from_string("cities").expect("collection path");
        Query::new(firestore, path).expect("query")
    }

    fn set_operation(key: &str) -> WriteOperation {
        WriteOperation::Set {
            key: DocumentKey::from_string(key).unwrap(),
            data: crate::firestore::value::MapValue::new(BTreeMap::new()),
            mask: None,
            transforms: Vec::new(),
        }
    }

    #[tokio::test]
    async fn allocate_query_is_idempotent_per_canonical_id() {
        let store = MemoryLocalStore::new();
        let query = sample_query();
        let first = store.allocate_query(&query).await.unwrap();
        let second = store.allocate_query(&query).await.unwrap();
        assert_eq!(first.target_id, second.target_id);
        assert!(first.target_id % 2 == 0, "local store ids stay even");
    }

    #[tokio::test]
    async fn write_locally_is_visible_through_execute_query() {
        let store = MemoryLocalStore::new();
        let query = sample_query();
        let result = store
            .write_locally(&User::unauthenticated(), vec![set_operation("cities/sf")])
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 1);

        let docs = store.execute_query(&query).await.unwrap();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        assert!(docs.get(&key).map(|doc| doc.is_document()).unwrap_or(false));
    }

    #[tokio::test]
    async fn acknowledging_a_batch_clears_its_overlay() {
        let store = MemoryLocalStore::new();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let result = store
            .write_locally(&User::unauthenticated(), vec![set_operation("cities/sf")])
            .await
            .unwrap();

        let ack = MutationBatchResult::new(result.batch_id, BTreeSet::from([key.clone()]), None, Vec::new());
        store.acknowledge_batch(&ack).await.unwrap();

        assert!(store.overlay_keys().await.is_empty());
        assert!(store.outstanding_batch_ids().await.is_empty());
    }

    #[tokio::test]
    async fn rejecting_a_batch_clears_its_overlay() {
        let store = MemoryLocalStore::new();
        let result = store
            .write_locally(&User::unauthenticated(), vec![set_operation("cities/sf")])
            .await
            .unwrap();

        store.reject_batch(result.batch_id).await.unwrap();
        assert!(store.overlay_keys().await.is_empty());
    }

    #[tokio::test]
    async fn user_change_drops_outstanding_overlays() {
        let store = MemoryLocalStore::new();
        store
            .write_locally(&User::unauthenticated(), vec![set_operation("cities/sf")])
            .await
            .unwrap();

        let changes = store.handle_user_change(&User::new("alice")).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(store.overlay_keys().await.is_empty());
    }
}
