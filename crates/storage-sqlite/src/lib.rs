//! SQLite persistence for comanda: versioned schema, entity repositories
//! whose write path co-commits a sync queue append, and the durable queue
//! itself.

pub mod customers;
pub mod db;
pub mod errors;
pub mod menu;
pub mod migrations;
pub mod orders;
pub mod schema;
pub mod store;
pub mod sync_queue;

pub use errors::StorageError;
pub use store::SqliteStore;
pub use sync_queue::{enqueue_mutation, EnqueueRequest, SyncQueueRepository};
