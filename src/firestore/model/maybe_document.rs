use crate::firestore::model::{DocumentKey, Timestamp};
use crate::firestore::value::MapValue;

/// A document as known to the local cache: either present with field data,
/// or confirmed absent. Distinct from [`crate::firestore::api::DocumentSnapshot`],
/// which is an API-surface type with no version — the sync engine and local
/// store need the version to detect stale/duplicate events and to stamp
/// synthetic deletes.
#[derive(Clone, Debug, PartialEq)]
pub enum MaybeDocument {
    Document {
        key: DocumentKey,
        version: Timestamp,
        data: MapValue,
    },
    NoDocument {
        key: DocumentKey,
        version: Timestamp,
        has_committed_mutations: bool,
    },
}

impl MaybeDocument {
    pub fn key(&self) -> &DocumentKey {
        match self {
            MaybeDocument::Document { key, .. } => key,
            MaybeDocument::NoDocument { key, .. } => key,
        }
    }

    pub fn version(&self) -> &Timestamp {
        match self {
            MaybeDocument::Document { version, .. } => version,
            MaybeDocument::NoDocument { version, .. } => version,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, MaybeDocument::Document { .. })
    }

    pub fn data(&self) -> Option<&MapValue> {
        match self {
            MaybeDocument::Document { data, .. } => Some(data),
            MaybeDocument::NoDocument { .. } => None,
        }
    }

    /// Builds a synthetic no-document at the zero version, used to purge a
    /// limbo key whose resolution listen was rejected (see the sync engine's
    /// handling of rejected limbo listens).
    pub fn synthetic_no_document(key: DocumentKey) -> Self {
        MaybeDocument::NoDocument {
            key,
            version: Timestamp::new(0, 0),
            has_committed_mutations: false,
        }
    }
}
