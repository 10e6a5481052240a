pub mod event_manager;
pub mod limbo;
pub mod local_store;
pub mod memory;
pub mod mutation_callbacks;
pub mod query_view_registry;
pub mod sync_engine;
pub mod target_id_generator;
pub mod view;

#[doc(inline)]
pub use event_manager::{SyncEventListener, ViewSnapshot};
#[doc(inline)]
pub use limbo::{LimboResolution, LimboTracker, LimboTrackerAction};
#[doc(inline)]
pub use local_store::{
    BatchId, LocalStore, LocalViewChanges, LocalWriteResult, QueryData, QueryPurpose,
};
#[doc(inline)]
pub use memory::{LocalStorePersistence, MemoryLocalStore, TargetMetadataSnapshot};
#[doc(inline)]
pub use mutation_callbacks::{MutationCallbackRegistry, OneShotCompletion};
#[doc(inline)]
pub use query_view_registry::{QueryView, QueryViewRegistry};
#[doc(inline)]
pub use sync_engine::SyncEngine;
#[doc(inline)]
pub use target_id_generator::TargetIdGenerator;
#[doc(inline)]
pub use view::{LimboDocumentChange, LimboDocumentChangeType, SyncState, View, ViewChange, ViewDocumentChanges};
