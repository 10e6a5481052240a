use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

use tokio::sync::oneshot;

use crate::firestore::error::{cancelled, FirestoreError, FirestoreResult};
use crate::firestore::model::User;

use super::local_store::BatchId;

/// One-shot completion an application awaits for a single outcome. Backed by
/// `tokio::sync::oneshot`, matching the wait-for-async-result pattern already
/// used by `database::realtime`'s connection bootstrap.
pub struct OneShotCompletion {
    receiver: oneshot::Receiver<FirestoreResult<()>>,
}

impl OneShotCompletion {
    pub async fn wait(self) -> FirestoreResult<()> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(cancelled("mutation callback dropped before completion")))
    }

    /// Builds a completion that is already resolved with `result`, for
    /// callers that need the `OneShotCompletion` return type even when there
    /// is no outstanding batch to wait on (e.g. `register_pending_writes_task`
    /// when the mutation queue is already empty).
    pub fn ready(result: FirestoreResult<()>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }
}

struct CompletionSender(oneshot::Sender<FirestoreResult<()>>);

impl CompletionSender {
    fn resolve(self, result: FirestoreResult<()>) {
        let _ = self.0.send(result);
    }
}

/// Owns the two completion tables the Sync Controller resolves as mutation
/// batches are acknowledged, rejected, or orphaned by a credential change.
#[derive(Default)]
pub struct MutationCallbackRegistry {
    user_callbacks: StdMutex<BTreeMap<User, BTreeMap<BatchId, CompletionSender>>>,
    pending_writes_callbacks: StdMutex<BTreeMap<BatchId, Vec<CompletionSender>>>,
}

impl MutationCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a completion for a specific batch, scoped to `user` so a
    /// later credential change can tell which callbacks it orphans.
    pub fn register_batch_callback(&self, user: &User, batch_id: BatchId) -> OneShotCompletion {
        let (sender, receiver) = oneshot::channel();
        self.user_callbacks
            .lock()
            .unwrap()
            .entry(user.clone())
            .or_default()
            .insert(batch_id, CompletionSender(sender));
        OneShotCompletion { receiver }
    }

    /// Registers a completion that resolves once `batch_id` (and therefore
    /// every batch queued before it) is acknowledged or rejected.
    pub fn register_pending_writes_callback(&self, batch_id: BatchId) -> OneShotCompletion {
        let (sender, receiver) = oneshot::channel();
        self.pending_writes_callbacks
            .lock()
            .unwrap()
            .entry(batch_id)
            .or_default()
            .push(CompletionSender(sender));
        OneShotCompletion { receiver }
    }

    /// Resolves the per-batch callback (for whichever user owns it) and every
    /// pending-writes callback registered for `batch_id`.
    pub fn resolve_batch(&self, batch_id: BatchId, result: FirestoreResult<()>) {
        {
            let mut guard = self.user_callbacks.lock().unwrap();
            for callbacks in guard.values_mut() {
                if let Some(sender) = callbacks.remove(&batch_id) {
                    sender.resolve(result.clone());
                    break;
                }
            }
        }
        self.resolve_pending_writes(batch_id, result);
    }

    /// Resolves every `pending_writes_callbacks` entry keyed at or below
    /// `batch_id`: acknowledging/rejecting a batch also satisfies every
    /// earlier-queued batch's waiters, since writes commit in order.
    fn resolve_pending_writes(&self, batch_id: BatchId, result: FirestoreResult<()>) {
        let mut guard = self.pending_writes_callbacks.lock().unwrap();
        let ready: Vec<BatchId> = guard.keys().copied().filter(|id| *id <= batch_id).collect();
        for id in ready {
            if let Some(senders) = guard.remove(&id) {
                for sender in senders {
                    sender.resolve(result.clone());
                }
            }
        }
    }

    /// Fails every outstanding `pending_writes_callbacks` completion with
    /// `Cancelled`, used when a credential change invalidates them.
    pub fn cancel_pending_writes(&self) {
        let mut guard = self.pending_writes_callbacks.lock().unwrap();
        for (_, senders) in std::mem::take(&mut *guard) {
            for sender in senders {
                sender.resolve(Err(cancelled_error()));
            }
        }
    }

    /// Drops (without resolving) the per-batch callbacks belonging to the
    /// previous user on a credential change; outstanding `wait()` futures
    /// observe the sender being dropped as a `Cancelled` error.
    pub fn abandon_user(&self, user: &User) {
        self.user_callbacks.lock().unwrap().remove(user);
    }
}

fn cancelled_error() -> FirestoreError {
    cancelled("pending writes cancelled by a credential change")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_callback_resolves_with_success() {
        let registry = MutationCallbackRegistry::new();
        let user = User::unauthenticated();
        let completion = registry.register_batch_callback(&user, 1);
        registry.resolve_batch(1, Ok(()));
        assert!(completion.wait().await.is_ok());
    }

    #[tokio::test]
    async fn pending_writes_resolve_in_batch_order() {
        let registry = MutationCallbackRegistry::new();
        let early = registry.register_pending_writes_callback(1);
        let late = registry.register_pending_writes_callback(5);

        registry.resolve_batch(3, Ok(()));
        assert!(early.wait().await.is_ok());

        registry.resolve_batch(5, Ok(()));
        assert!(late.wait().await.is_ok());
    }

    #[tokio::test]
    async fn credential_change_cancels_pending_writes() {
        let registry = MutationCallbackRegistry::new();
        let completion = registry.register_pending_writes_callback(2);
        registry.cancel_pending_writes();
        assert!(completion.wait().await.is_err());
    }
}
