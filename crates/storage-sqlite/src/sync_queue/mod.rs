//! Durable outbox of pending mutations (the sync queue).

mod model;
mod repository;

pub use model::{NewSyncQueueItemDB, SyncQueueItemDB};
pub use repository::{enqueue_mutation, EnqueueRequest, SyncQueueRepository};
pub(crate) use repository::{enum_from_db, enum_to_db};
