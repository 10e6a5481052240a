use std::collections::BTreeSet;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, Timestamp};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::remote::streams::WriteResult;

/// Batch of mutations queued for the streaming write pipeline.
///
/// Mirrors the Firestore JS SDK's `MutationBatch` shape from
/// `packages/firestore/src/model/mutation_batch.ts`, but currently only tracks
/// the information the Rust remote store requires to drive the gRPC write
/// stream.
#[derive(Clone, Debug)]
pub struct MutationBatch {
    /// Monotonic identifier assigned locally when the batch is queued.
    pub batch_id: i32,
    /// Local clock reading when the batch was queued; becomes the documents'
    /// cache version until the backend-assigned commit version lands.
    pub local_write_time: Timestamp,
    /// Ordered write operations that should be sent to Firestore.
    pub writes: Vec<WriteOperation>,
}

impl MutationBatch {
    /// Creates a new mutation batch with an explicit identifier, stamping
    /// the local write time with the current clock reading.
    pub fn new(batch_id: i32, writes: Vec<WriteOperation>) -> Self {
        Self::from_writes(batch_id, Timestamp::now(), writes)
    }

    /// Creates a new mutation batch with an explicit identifier and local
    /// write time.
    pub fn from_writes(batch_id: i32, local_write_time: Timestamp, writes: Vec<WriteOperation>) -> Self {
        Self {
            batch_id,
            local_write_time,
            writes,
        }
    }

    /// Returns `true` when the batch contains no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Document keys touched by this batch, in write order (duplicates removed).
    pub fn keys(&self) -> BTreeSet<DocumentKey> {
        self.writes.iter().map(|write| write.key().clone()).collect()
    }
}

/// Successful acknowledgement of a single mutation batch.
#[derive(Clone, Debug)]
pub struct MutationBatchResult {
    /// Identifier of the acknowledged batch.
    pub batch_id: i32,
    /// Document keys the batch wrote to.
    pub keys: BTreeSet<DocumentKey>,
    /// Commit timestamp returned by the backend.
    pub commit_version: Option<Timestamp>,
    /// Individual write results produced by the RPC.
    pub write_results: Vec<WriteResult>,
}

impl MutationBatchResult {
    /// Builds a new result payload from the streamed write response.
    pub fn new(
        batch_id: i32,
        keys: BTreeSet<DocumentKey>,
        commit_version: Option<Timestamp>,
        write_results: Vec<WriteResult>,
    ) -> Self {
        Self {
            batch_id,
            keys,
            commit_version,
            write_results,
        }
    }

    /// Pairs a committed batch with the backend's response, validating that
    /// the result count lines up with the number of writes sent.
    pub fn from(
        batch: MutationBatch,
        commit_version: Option<Timestamp>,
        write_results: Vec<WriteResult>,
    ) -> FirestoreResult<Self> {
        if write_results.len() != batch.writes.len() {
            return Err(invalid_argument(format!(
                "write response carried {} results for a batch of {} writes",
                write_results.len(),
                batch.writes.len()
            )));
        }
        Ok(Self::new(batch.batch_id, batch.keys(), commit_version, write_results))
    }

    /// Identifier of the acknowledged batch.
    pub fn batch_id(&self) -> i32 {
        self.batch_id
    }
}
