//! Repository for the durable sync queue.
//!
//! Ordering and single-writer-per-entity are enforced here, not in the
//! engine: `peek_batch` never hands out two items for one entity key, and
//! never an item whose key currently has a row in `syncing`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::warn;

use comanda_core::sync::{
    QueueCounts, SyncEntity, SyncIssue, SyncIssueKind, SyncOperation, SyncQueueItem,
    SyncQueueStore, SyncStatus,
};
use comanda_core::{Error, Result};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{customers, menu_items, orders, sync_queue};

use super::model::{NewSyncQueueItemDB, SyncQueueItemDB};

pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

fn to_queue_item(row: SyncQueueItemDB) -> Result<SyncQueueItem> {
    let status = SyncStatus::from_db_str(&row.status);
    if status.as_db_str() != row.status {
        warn!(
            "[SyncQueue] Unrecognized status '{}' on item {}; normalizing to pending_sync",
            row.status, row.id
        );
    }
    Ok(SyncQueueItem {
        id: row.id,
        entity_type: enum_from_db(&row.entity_type)?,
        entity_id: row.entity_id,
        operation: enum_from_db(&row.operation)?,
        payload: row.payload,
        status,
        attempt_count: row.attempt_count,
        last_attempt_at: row.last_attempt_at,
        next_retry_at: row.next_retry_at,
        last_error: row.last_error,
        last_error_code: row.last_error_code,
        created_at: row.created_at,
    })
}

/// A mutation to record in the queue, snapshotting the entity state at
/// enqueue time.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub entity: SyncEntity,
    pub entity_id: String,
    pub operation: SyncOperation,
    pub payload: serde_json::Value,
}

impl EnqueueRequest {
    pub fn new(
        entity: SyncEntity,
        entity_id: impl Into<String>,
        operation: SyncOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity,
            entity_id: entity_id.into(),
            operation,
            payload,
        }
    }
}

/// Append a `pending_sync` item. Must be called on the same connection,
/// inside the same transaction, as the entity mutation it records; the two
/// commit or roll back together.
pub fn enqueue_mutation(conn: &mut SqliteConnection, request: EnqueueRequest) -> Result<i64> {
    let row = NewSyncQueueItemDB {
        entity_type: enum_to_db(&request.entity)?,
        entity_id: request.entity_id,
        operation: enum_to_db(&request.operation)?,
        payload: serde_json::to_string(&request.payload)?,
        status: SyncStatus::PendingSync.as_db_str().to_string(),
        attempt_count: 0,
        created_at: Utc::now().to_rfc3339(),
    };

    let id = diesel::insert_into(sync_queue::table)
        .values(&row)
        .returning(sync_queue::id)
        .get_result::<i64>(conn)
        .map_err(StorageError::from)?;
    Ok(id)
}

/// Serialize the entity's current row, or `None` when it no longer exists.
fn current_snapshot(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    entity_id: &str,
) -> Result<Option<serde_json::Value>> {
    let value = match entity {
        SyncEntity::MenuItem => menu_items::table
            .find(entity_id)
            .first::<crate::menu::MenuItemDB>(conn)
            .optional()
            .map_err(StorageError::from)?
            .map(|row| serde_json::to_value(&row))
            .transpose()?,
        SyncEntity::Order => orders::table
            .find(entity_id)
            .first::<crate::orders::OrderDB>(conn)
            .optional()
            .map_err(StorageError::from)?
            .map(|row| serde_json::to_value(&row))
            .transpose()?,
        SyncEntity::Customer => customers::table
            .find(entity_id)
            .first::<crate::customers::CustomerDB>(conn)
            .optional()
            .map_err(StorageError::from)?
            .map(|row| serde_json::to_value(&row))
            .transpose()?,
    };
    Ok(value)
}

pub struct SyncQueueRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SyncQueueRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Fetch one item by id, mostly for inspection and tests.
    pub fn get_item(&self, queue_id: i64) -> Result<Option<SyncQueueItem>> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_queue::table
            .find(queue_id)
            .first::<SyncQueueItemDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_queue_item).transpose()
    }

    /// All items for one entity key, in id order.
    pub fn list_for_entity(&self, entity: SyncEntity, entity_id: &str) -> Result<Vec<SyncQueueItem>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(sync_queue::entity_type.eq(enum_to_db(&entity)?))
            .filter(sync_queue::entity_id.eq(entity_id))
            .order(sync_queue::id.asc())
            .load::<SyncQueueItemDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_queue_item).collect()
    }
}

#[async_trait]
impl SyncQueueStore for SyncQueueRepository {
    fn peek_batch(&self, max_n: i64, max_attempts: i32) -> Result<Vec<SyncQueueItem>> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        // Entity keys with an in-flight item are off limits.
        let blocked: HashSet<(String, String)> = sync_queue::table
            .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str()))
            .select((sync_queue::entity_type, sync_queue::entity_id))
            .load::<(String, String)>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .collect();

        // Anything that is not in a known non-dispatchable status counts as
        // pending; that is what makes the corrupted-status fallback a retry.
        let settled = vec![
            SyncStatus::Syncing.as_db_str(),
            SyncStatus::Synced.as_db_str(),
            SyncStatus::Failed.as_db_str(),
            SyncStatus::Conflict.as_db_str(),
        ];
        // One candidate per entity key, selected and bounded in SQL so a
        // large backlog never loads whole. The limit leaves headroom for
        // keys struck out by the blocked set.
        let candidates = sync_queue::table
            .filter(
                sync_queue::status.ne_all(settled).or(sync_queue::status
                    .eq(SyncStatus::Failed.as_db_str())
                    .and(sync_queue::attempt_count.lt(max_attempts))
                    .and(sync_queue::next_retry_at.le(now))),
            )
            .group_by((sync_queue::entity_type, sync_queue::entity_id))
            .select((
                sync_queue::entity_type,
                sync_queue::entity_id,
                diesel::dsl::min(sync_queue::id),
            ))
            .order(diesel::dsl::min(sync_queue::id).asc())
            .limit(max_n.max(0) + blocked.len() as i64)
            .load::<(String, String, Option<i64>)>(&mut conn)
            .map_err(StorageError::from)?;

        let ids: Vec<i64> = candidates
            .into_iter()
            .filter(|(entity_type, entity_id, _)| {
                !blocked.contains(&(entity_type.clone(), entity_id.clone()))
            })
            .filter_map(|(_, _, id)| id)
            .take(max_n.max(0) as usize)
            .collect();

        let rows = sync_queue::table
            .filter(sync_queue::id.eq_any(&ids))
            .order(sync_queue::id.asc())
            .load::<SyncQueueItemDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_queue_item).collect()
    }

    async fn mark_syncing(&self, ids: Vec<i64>) -> Result<Vec<SyncQueueItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let rows = sync_queue::table
                    .filter(sync_queue::id.eq_any(&ids))
                    .order(sync_queue::id.asc())
                    .load::<SyncQueueItemDB>(conn)
                    .map_err(StorageError::from)?;

                let mut claimed = Vec::new();
                for row in rows {
                    let eligible = match SyncStatus::from_db_str(&row.status) {
                        SyncStatus::PendingSync => true,
                        // Retry-eligible failures carry a retry slot;
                        // dead-lettered ones do not.
                        SyncStatus::Failed => row.next_retry_at.is_some(),
                        _ => false,
                    };
                    if !eligible {
                        continue;
                    }
                    let updated = diesel::update(sync_queue::table.find(row.id))
                        .set((
                            sync_queue::status.eq(SyncStatus::Syncing.as_db_str()),
                            sync_queue::attempt_count.eq(row.attempt_count + 1),
                            sync_queue::last_attempt_at.eq(Some(now.clone())),
                            sync_queue::next_retry_at.eq(None::<String>),
                        ))
                        .returning(SyncQueueItemDB::as_returning())
                        .get_result::<SyncQueueItemDB>(conn)
                        .map_err(StorageError::from)?;
                    claimed.push(to_queue_item(updated)?);
                }
                Ok(claimed)
            })
            .await
    }

    async fn mark_synced(&self, ids: Vec<i64>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                diesel::update(
                    sync_queue::table
                        .filter(sync_queue::id.eq_any(ids))
                        .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str())),
                )
                .set((
                    sync_queue::status.eq(SyncStatus::Synced.as_db_str()),
                    sync_queue::next_retry_at.eq(None::<String>),
                    sync_queue::last_error.eq(None::<String>),
                    sync_queue::last_error_code.eq(None::<String>),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_conflict(&self, id: i64, reason: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::update(
                    sync_queue::table
                        .filter(sync_queue::id.eq(id))
                        .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str())),
                )
                .set((
                    sync_queue::status.eq(SyncStatus::Conflict.as_db_str()),
                    sync_queue::last_error.eq(Some(reason)),
                    sync_queue::last_error_code.eq(Some("conflict".to_string())),
                    sync_queue::next_retry_at.eq(None::<String>),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        error: String,
        error_code: Option<String>,
        next_retry_at: Option<String>,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::update(
                    sync_queue::table
                        .filter(sync_queue::id.eq(id))
                        .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str())),
                )
                .set((
                    sync_queue::status.eq(SyncStatus::Failed.as_db_str()),
                    sync_queue::last_error.eq(Some(error)),
                    sync_queue::last_error_code.eq(error_code),
                    sync_queue::next_retry_at.eq(next_retry_at),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn reset_stuck_syncing(&self, timeout_secs: i64, max_attempts: i32) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let cutoff = (Utc::now() - Duration::seconds(timeout_secs)).to_rfc3339();
                let now = Utc::now().to_rfc3339();

                let retriable = diesel::update(
                    sync_queue::table
                        .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str()))
                        .filter(
                            sync_queue::last_attempt_at
                                .is_null()
                                .or(sync_queue::last_attempt_at.le(cutoff.clone())),
                        )
                        .filter(sync_queue::attempt_count.lt(max_attempts)),
                )
                .set((
                    sync_queue::status.eq(SyncStatus::Failed.as_db_str()),
                    sync_queue::last_error
                        .eq(Some("Dispatch timed out; reset by watchdog".to_string())),
                    sync_queue::last_error_code.eq(Some("watchdog_timeout".to_string())),
                    sync_queue::next_retry_at.eq(Some(now)),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                let dead = diesel::update(
                    sync_queue::table
                        .filter(sync_queue::status.eq(SyncStatus::Syncing.as_db_str()))
                        .filter(
                            sync_queue::last_attempt_at
                                .is_null()
                                .or(sync_queue::last_attempt_at.le(cutoff)),
                        )
                        .filter(sync_queue::attempt_count.ge(max_attempts)),
                )
                .set((
                    sync_queue::status.eq(SyncStatus::Failed.as_db_str()),
                    sync_queue::last_error
                        .eq(Some("Dispatch timed out; attempts exhausted".to_string())),
                    sync_queue::last_error_code.eq(Some("watchdog_timeout".to_string())),
                    sync_queue::next_retry_at.eq(None::<String>),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                Ok(retriable + dead)
            })
            .await
    }

    async fn prune_synced(&self, horizon_days: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let cutoff = (Utc::now() - Duration::days(horizon_days)).to_rfc3339();
                let deleted = diesel::delete(
                    sync_queue::table
                        .filter(sync_queue::status.eq(SyncStatus::Synced.as_db_str()))
                        .filter(sync_queue::created_at.le(cutoff)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(deleted)
            })
            .await
    }

    async fn resubmit(&self, queue_id: i64) -> Result<i64> {
        self.writer
            .exec(move |conn| {
                let row = sync_queue::table
                    .find(queue_id)
                    .first::<SyncQueueItemDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .ok_or_else(|| Error::not_found(format!("sync queue item {}", queue_id)))?;

                let status = SyncStatus::from_db_str(&row.status);
                let resubmittable = status == SyncStatus::Conflict
                    || (status == SyncStatus::Failed && row.next_retry_at.is_none());
                if !resubmittable {
                    return Err(Error::validation(format!(
                        "Queue item {} is {:?}; only conflicts and dead-lettered failures can be resubmitted",
                        queue_id, status
                    )));
                }

                let entity: SyncEntity = enum_from_db(&row.entity_type)?;
                let original_op: SyncOperation = enum_from_db(&row.operation)?;

                // Fresh snapshot of the entity's current state. If the entity
                // is gone, the resubmission becomes a delete.
                let (operation, payload) = if original_op == SyncOperation::Delete {
                    (
                        SyncOperation::Delete,
                        serde_json::json!({ "id": row.entity_id }),
                    )
                } else {
                    match current_snapshot(conn, entity, &row.entity_id)? {
                        Some(value) => (original_op, value),
                        None => (
                            SyncOperation::Delete,
                            serde_json::json!({ "id": row.entity_id }),
                        ),
                    }
                };

                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(entity, row.entity_id, operation, payload),
                )
            })
            .await
    }

    fn list_reported_issues(&self) -> Result<Vec<SyncIssue>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(
                sync_queue::status.eq(SyncStatus::Conflict.as_db_str()).or(sync_queue::status
                    .eq(SyncStatus::Failed.as_db_str())
                    .and(sync_queue::next_retry_at.is_null())),
            )
            .order(sync_queue::id.asc())
            .load::<SyncQueueItemDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| {
                let kind = if SyncStatus::from_db_str(&row.status) == SyncStatus::Conflict {
                    SyncIssueKind::Conflict
                } else {
                    SyncIssueKind::DeadLetter
                };
                Ok(SyncIssue {
                    queue_id: row.id,
                    entity_type: enum_from_db(&row.entity_type)?,
                    entity_id: row.entity_id,
                    operation: enum_from_db(&row.operation)?,
                    kind,
                    reason: row.last_error,
                    attempt_count: row.attempt_count,
                    last_attempt_at: row.last_attempt_at,
                })
            })
            .collect()
    }

    fn queue_counts(&self) -> Result<QueueCounts> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .group_by(sync_queue::status)
            .select((sync_queue::status, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)
            .map_err(StorageError::from)?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match SyncStatus::from_db_str(&status) {
                SyncStatus::PendingSync => counts.pending_sync += count,
                SyncStatus::Syncing => counts.syncing += count,
                SyncStatus::Synced => counts.synced += count,
                SyncStatus::Failed => counts.failed += count,
                SyncStatus::Conflict => counts.conflict += count,
            }
        }
        Ok(counts)
    }
}
