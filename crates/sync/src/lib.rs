//! Background synchronization engine.
//!
//! Drains the durable outbox kept by the storage layer, pushes each mutation
//! to the remote backend, and settles queue items according to the outcome.
//! The engine owns scheduling (poll loop, backoff, watchdog, retention); the
//! queue itself owns ordering and single-writer-per-entity.

pub mod client;
pub mod connectivity;
pub mod engine;
pub mod error;

pub use client::{RemoteSyncClient, SyncEndpoint, SyncPushOutcome, SyncPushRequest};
pub use connectivity::{AlwaysOnline, ConnectivitySignal, SharedConnectivity};
pub use engine::{DrainCycleReport, SyncEngine, SyncEngineConfig, SyncEngineHandle};
pub use error::SyncApiError;
