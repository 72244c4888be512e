use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use comanda_core::menu::{MenuItem, MenuItemRepositoryTrait, NewMenuItem};
use comanda_core::sync::{SyncEntity, SyncOperation};
use comanda_core::{DatabaseError, Error, Result};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::menu_items;
use crate::sync_queue::{enqueue_mutation, EnqueueRequest};

use super::model::MenuItemDB;

fn to_menu_item(row: MenuItemDB) -> Result<MenuItem> {
    let price = Decimal::from_str(&row.price).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Invalid price '{}' on menu item {}: {}",
            row.price, row.id, e
        )))
    })?;
    Ok(MenuItem {
        id: row.id,
        name: row.name,
        category: row.category,
        price,
        currency: row.currency,
        is_available: row.is_available != 0,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub struct MenuItemRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl MenuItemRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl MenuItemRepositoryTrait for MenuItemRepository {
    fn get_menu_item(&self, item_id: &str) -> Result<Option<MenuItem>> {
        let mut conn = get_connection(&self.pool)?;
        let row = menu_items::table
            .find(item_id)
            .first::<MenuItemDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_menu_item).transpose()
    }

    fn list_menu_items(&self) -> Result<Vec<MenuItem>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = menu_items::table
            .order(menu_items::name.asc())
            .load::<MenuItemDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_menu_item).collect()
    }

    async fn insert_menu_item(&self, new_item: NewMenuItem) -> Result<MenuItem> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let row = MenuItemDB {
                    id: Uuid::new_v4().to_string(),
                    name: new_item.name,
                    category: new_item.category,
                    price: new_item.price.to_string(),
                    currency: new_item.currency,
                    is_available: 1,
                    created_at: now.clone(),
                    updated_at: now,
                };
                let inserted = diesel::insert_into(menu_items::table)
                    .values(&row)
                    .returning(MenuItemDB::as_returning())
                    .get_result::<MenuItemDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::MenuItem,
                        inserted.id.clone(),
                        SyncOperation::Create,
                        serde_json::to_value(&inserted)?,
                    ),
                )?;
                to_menu_item(inserted)
            })
            .await
    }

    async fn update_menu_item(&self, item: MenuItem) -> Result<MenuItem> {
        self.writer
            .exec(move |conn| {
                let row = MenuItemDB {
                    id: item.id.clone(),
                    name: item.name,
                    category: item.category,
                    price: item.price.to_string(),
                    currency: item.currency,
                    is_available: i32::from(item.is_available),
                    created_at: item.created_at,
                    updated_at: Utc::now().to_rfc3339(),
                };
                let updated = diesel::update(menu_items::table.find(&item.id))
                    .set(&row)
                    .returning(MenuItemDB::as_returning())
                    .get_result::<MenuItemDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::MenuItem,
                        updated.id.clone(),
                        SyncOperation::Update,
                        serde_json::to_value(&updated)?,
                    ),
                )?;
                to_menu_item(updated)
            })
            .await
    }

    async fn delete_menu_item(&self, item_id: String) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(menu_items::table.find(&item_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected > 0 {
                    enqueue_mutation(
                        conn,
                        EnqueueRequest::new(
                            SyncEntity::MenuItem,
                            item_id.clone(),
                            SyncOperation::Delete,
                            serde_json::json!({ "id": item_id }),
                        ),
                    )?;
                }
                Ok(affected)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use crate::schema::sync_queue;
    use crate::store::SqliteStore;

    fn setup_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn new_item(name: &str) -> NewMenuItem {
        NewMenuItem {
            name: name.to_string(),
            category: None,
            price: dec!(8.00),
            currency: "EUR".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_persists_row_and_queue_entry_together() {
        let (_dir, store) = setup_store();
        let menu = store.menu_items();

        let item = menu.insert_menu_item(new_item("Espresso")).await.unwrap();
        assert!(menu.get_menu_item(&item.id).unwrap().is_some());

        let mut conn = get_connection(&store.pool()).unwrap();
        let queued: i64 = sync_queue::table
            .filter(sync_queue::entity_id.eq(&item.id))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn failed_write_job_rolls_back_row_and_queue_entry() {
        let (_dir, store) = setup_store();
        let writer = store.writer();

        let result: Result<()> = writer
            .exec(|conn| {
                let now = Utc::now().to_rfc3339();
                let row = MenuItemDB {
                    id: "doomed".to_string(),
                    name: "Affogato".to_string(),
                    category: None,
                    price: "4.50".to_string(),
                    currency: "EUR".to_string(),
                    is_available: 1,
                    created_at: now.clone(),
                    updated_at: now,
                };
                diesel::insert_into(menu_items::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::MenuItem,
                        "doomed",
                        SyncOperation::Create,
                        serde_json::to_value(&row)?,
                    ),
                )?;
                Err(Error::validation("forced failure after both writes"))
            })
            .await;
        assert!(result.is_err());

        let menu = store.menu_items();
        assert!(menu.get_menu_item("doomed").unwrap().is_none());

        let mut conn = get_connection(&store.pool()).unwrap();
        let queued: i64 = sync_queue::table
            .filter(sync_queue::entity_id.eq("doomed"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(queued, 0);
    }

    #[tokio::test]
    async fn delete_of_missing_item_enqueues_nothing() {
        let (_dir, store) = setup_store();
        let menu = store.menu_items();

        let affected = menu.delete_menu_item("ghost".to_string()).await.unwrap();
        assert_eq!(affected, 0);

        let mut conn = get_connection(&store.pool()).unwrap();
        let queued: i64 = sync_queue::table
            .filter(sync_queue::entity_id.eq("ghost"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(queued, 0);
    }
}
