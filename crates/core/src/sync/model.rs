//! Sync queue domain models and the adapter layer for persisted enumerations.

use serde::{Deserialize, Serialize};

/// Entity kinds that participate in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    MenuItem,
    Order,
    Customer,
}

impl SyncEntity {
    /// Stable name used in idempotency keys and remote endpoint paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntity::MenuItem => "menu_item",
            SyncEntity::Order => "order",
            SyncEntity::Customer => "customer",
        }
    }
}

/// Supported mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

/// Lifecycle status of a queue item.
///
/// `Synced` is terminal. `Failed` and `Conflict` are terminal unless the item
/// is explicitly resubmitted, which appends a fresh queue item rather than
/// mutating history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    PendingSync,
    Syncing,
    Synced,
    Failed,
    Conflict,
}

impl SyncStatus {
    /// Encode to the string form stored in SQLite. Total over the enum.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SyncStatus::PendingSync => "pending_sync",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// Decode from a stored string. Total and pure: any unrecognized value
    /// degrades to `PendingSync` so a corrupted or forward-incompatible row
    /// is retried rather than dropped or crashing the read path. Callers that
    /// care about the normalization should log it at the read site.
    pub fn from_db_str(value: &str) -> SyncStatus {
        match value {
            "pending_sync" => SyncStatus::PendingSync,
            "syncing" => SyncStatus::Syncing,
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed,
            "conflict" => SyncStatus::Conflict,
            _ => SyncStatus::PendingSync,
        }
    }

    /// True for statuses the engine never transitions out of.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Synced | SyncStatus::Failed | SyncStatus::Conflict
        )
    }
}

/// One pending mutation in the durable outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Monotonic local id; dispatch order within an entity key.
    pub id: i64,
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub operation: SyncOperation,
    /// Immutable JSON snapshot of the entity at enqueue time.
    pub payload: String,
    pub status: SyncStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
    pub created_at: String,
}

impl SyncQueueItem {
    pub fn entity_key(&self) -> (SyncEntity, &str) {
        (self.entity_type, &self.entity_id)
    }
}

/// Kind of issue surfaced through the reported-errors interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncIssueKind {
    /// Remote rejected the mutation; requires explicit resubmission.
    Conflict,
    /// Retries exhausted; requires external intervention.
    DeadLetter,
}

/// A queue item requiring user attention (conflict or dead-lettered failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub queue_id: i64,
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub operation: SyncOperation,
    pub kind: SyncIssueKind,
    pub reason: Option<String>,
    pub attempt_count: i32,
    pub last_attempt_at: Option<String>,
}

/// Queue population by status, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending_sync: i64,
    pub syncing: i64,
    pub synced: i64,
    pub failed: i64,
    pub conflict: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decode_is_total_and_defaults_to_pending() {
        assert_eq!(SyncStatus::from_db_str("synced"), SyncStatus::Synced);
        assert_eq!(SyncStatus::from_db_str(""), SyncStatus::PendingSync);
        assert_eq!(SyncStatus::from_db_str("SYNCED"), SyncStatus::PendingSync);
        assert_eq!(
            SyncStatus::from_db_str("totally-bogus"),
            SyncStatus::PendingSync
        );
    }

    #[test]
    fn status_decode_is_idempotent_over_encode() {
        for status in [
            SyncStatus::PendingSync,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Failed,
            SyncStatus::Conflict,
        ] {
            assert_eq!(SyncStatus::from_db_str(status.as_db_str()), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(SyncStatus::Synced.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Conflict.is_terminal());
        assert!(!SyncStatus::PendingSync.is_terminal());
        assert!(!SyncStatus::Syncing.is_terminal());
    }

    #[test]
    fn entity_serialization_matches_backend_contract() {
        let actual = [SyncEntity::MenuItem, SyncEntity::Order, SyncEntity::Customer]
            .iter()
            .map(|entity| serde_json::to_string(entity).expect("serialize sync entity"))
            .collect::<Vec<_>>();
        assert_eq!(actual, vec!["\"menu_item\"", "\"order\"", "\"customer\""]);
    }
}
