//! Durable sync queue contract implemented by the SQLite storage layer.

use async_trait::async_trait;

use crate::Result;

use super::{QueueCounts, SyncIssue, SyncQueueItem};

/// Port over the durable outbox.
///
/// The queue, not the engine, enforces single-writer-per-entity: `peek_batch`
/// never returns an item for an entity key that already has an item in
/// `syncing`, and never two items for the same key in one batch.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    /// Items eligible for dispatch, ordered by `id` within each entity key:
    /// `pending_sync` rows, plus `failed` rows with `attempt_count` below
    /// `max_attempts` whose `next_retry_at` has elapsed.
    fn peek_batch(&self, max_n: i64, max_attempts: i32) -> Result<Vec<SyncQueueItem>>;

    /// Transition the given items to `syncing`, bumping `attempt_count` and
    /// stamping `last_attempt_at`. Returns the claimed items; rows already in
    /// a terminal state are skipped.
    async fn mark_syncing(&self, ids: Vec<i64>) -> Result<Vec<SyncQueueItem>>;

    /// Terminal success. Only applies to rows currently `syncing`.
    async fn mark_synced(&self, ids: Vec<i64>) -> Result<()>;

    /// Remote rejected the mutation. Terminal unless resubmitted.
    async fn mark_conflict(&self, id: i64, reason: String) -> Result<()>;

    /// Transient failure. `next_retry_at == None` dead-letters the item.
    async fn mark_failed(
        &self,
        id: i64,
        error: String,
        error_code: Option<String>,
        next_retry_at: Option<String>,
    ) -> Result<()>;

    /// Watchdog sweep: any item stuck in `syncing` longer than `timeout_secs`
    /// falls back to `failed` so a crashed in-flight call cannot wedge its
    /// entity key. Items with attempts left get an immediate retry slot;
    /// exhausted ones are dead-lettered. Returns the number of reset rows.
    async fn reset_stuck_syncing(&self, timeout_secs: i64, max_attempts: i32) -> Result<usize>;

    /// Retention sweep deleting `synced` rows older than the horizon.
    async fn prune_synced(&self, horizon_days: i64) -> Result<usize>;

    /// Create a fresh `pending_sync` item for a `conflict` or dead-lettered
    /// `failed` row, snapshotting the entity's *current* state. The original
    /// row is left untouched. Returns the new queue id.
    async fn resubmit(&self, queue_id: i64) -> Result<i64>;

    /// Conflicts and dead-lettered failures, for the reported-errors surface.
    fn list_reported_issues(&self) -> Result<Vec<SyncIssue>>;

    fn queue_counts(&self) -> Result<QueueCounts>;
}
