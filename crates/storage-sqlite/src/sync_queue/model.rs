//! Database models for the sync queue table.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Selectable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncQueueItemDB {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub payload: String,
    pub status: String,
    pub attempt_count: i32,
    pub last_attempt_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
    pub created_at: String,
}

/// Insert form; `id` is assigned by SQLite.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_queue)]
pub struct NewSyncQueueItemDB {
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub payload: String,
    pub status: String,
    pub attempt_count: i32,
    pub created_at: String,
}
