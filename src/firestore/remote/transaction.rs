use std::collections::BTreeMap;
use std::sync::Arc;

use crate::firestore::api::operations::{self, SetOptions};
use crate::firestore::api::{
    converter::FirestoreDataConverter, database::Firestore, reference::ConvertedDocumentReference,
    DocumentReference, DocumentSnapshot,
};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::DocumentKey;
use crate::firestore::remote::datastore::{Datastore, WriteOperation};
use crate::firestore::value::FirestoreValue;

/// A single read-modify-write attempt created by [`super::RemoteStore::create_transaction`].
///
/// Unlike [`crate::firestore::api::write_batch::WriteBatch`], a `Transaction`
/// is not reusable: a fresh one is created for every attempt of the sync
/// engine's retry loop (see `SyncEngine::transaction`), and `commit` consumes
/// it. The accumulated writes are committed through the same
/// `Arc<dyn Datastore>::commit` the plain `WriteBatch` uses — a transaction
/// in this crate is a one-shot RPC, not a separate streamed protocol.
pub struct Transaction {
    firestore: Firestore,
    datastore: Arc<dyn Datastore>,
    writes: Vec<WriteOperation>,
}

impl Transaction {
    pub(crate) fn new(firestore: Firestore, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            firestore,
            datastore,
            writes: Vec::new(),
        }
    }

    /// Reads a document within the transaction.
    ///
    /// This crate's `Datastore` does not expose server-side transaction
    /// handles, so reads are plain point lookups; last-writer-wins
    /// conflict resolution at the field level happens downstream in the
    /// mutation layer, not here.
    pub async fn get(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_same_firestore(reference.firestore())?;
        let key = DocumentKey::from_path(reference.path().clone())?;
        self.datastore.get_document(&key).await
    }

    pub fn set(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_same_firestore(reference.firestore())?;
        let key = DocumentKey::from_path(reference.path().clone())?;
        let options = options.unwrap_or_default();
        let encoded = operations::encode_set_data(data, &options)?;
        self.writes.push(WriteOperation::Set {
            key,
            data: encoded.map,
            mask: encoded.mask,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    pub fn set_with_converter<C>(
        &mut self,
        reference: &ConvertedDocumentReference<C>,
        model: C::Model,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self>
    where
        C: FirestoreDataConverter,
    {
        let converter = reference.converter();
        let map = converter.to_map(&model)?;
        self.set(reference.raw(), map, options)
    }

    pub fn update(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_same_firestore(reference.firestore())?;
        let key = DocumentKey::from_path(reference.path().clone())?;
        let encoded = operations::encode_update_document_data(data)?;
        self.writes.push(WriteOperation::Update {
            key,
            data: encoded.map,
            field_paths: encoded.field_paths,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    pub fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<&mut Self> {
        self.ensure_same_firestore(reference.firestore())?;
        let key = DocumentKey::from_path(reference.path().clone())?;
        self.writes.push(WriteOperation::Delete { key });
        Ok(self)
    }

    /// Commits the accumulated writes as a single atomic RPC.
    pub(crate) async fn commit(self) -> FirestoreResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.datastore.commit(self.writes).await
    }

    fn ensure_same_firestore(&self, other: &Firestore) -> FirestoreResult<()> {
        if self.firestore.database_id() != other.database_id() {
            return Err(invalid_argument(
                "All Transaction operations must target the same Firestore instance",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::DatabaseId;
    use crate::firestore::remote::datastore::InMemoryDatastore;
    use crate::test_support::firebase::test_firebase_app_with_api_key;
    use std::collections::BTreeMap as Map;

    fn sample_firestore() -> Firestore {
        let app = test_firebase_app_with_api_key("transaction-test");
        Firestore::new(app, DatabaseId::new("test", "(default)"))
    }

    #[tokio::test]
    async fn commit_with_no_writes_is_a_no_op() {
        let firestore = sample_firestore();
        let datastore: Arc<dyn Datastore> = Arc::new(InMemoryDatastore::new());
        let txn = Transaction::new(firestore, datastore);
        assert!(txn.commit().await.is_ok());
    }

    #[tokio::test]
    async fn set_then_commit_writes_through_the_datastore() {
        let firestore = sample_firestore();
        let datastore: Arc<dyn Datastore> = Arc::new(InMemoryDatastore::new());
        let mut txn = Transaction::new(firestore.clone(), Arc::clone(&datastore));
        let reference = firestore.doc("cities/sf").unwrap();

        let mut data = Map::new();
        data.insert("name".to_string(), FirestoreValue::from_string("SF"));
        txn.set(&reference, data, None).unwrap();
        assert!(txn.commit().await.is_ok());
    }
}
