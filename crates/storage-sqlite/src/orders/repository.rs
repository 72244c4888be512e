use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use comanda_core::orders::{NewOrder, Order, OrderRepositoryTrait, OrderStatus};
use comanda_core::sync::{SyncEntity, SyncOperation};
use comanda_core::{DatabaseError, Error, Result};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::orders;
use crate::sync_queue::{enqueue_mutation, enum_from_db, enum_to_db, EnqueueRequest};

use super::model::OrderDB;

fn to_order(row: OrderDB) -> Result<Order> {
    let total = Decimal::from_str(&row.total).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Invalid total '{}' on order {}: {}",
            row.total, row.id, e
        )))
    })?;
    Ok(Order {
        id: row.id,
        customer_id: row.customer_id,
        table_label: row.table_label,
        status: enum_from_db::<OrderStatus>(&row.status)?,
        total,
        currency: row.currency,
        note: row.note,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub struct OrderRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl OrderRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let mut conn = get_connection(&self.pool)?;
        let row = orders::table
            .find(order_id)
            .first::<OrderDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_order).transpose()
    }

    fn list_orders(&self) -> Result<Vec<Order>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = orders::table
            .order(orders::created_at.desc())
            .load::<OrderDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_order).collect()
    }

    async fn insert_order(&self, new_order: NewOrder) -> Result<Order> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let row = OrderDB {
                    id: Uuid::new_v4().to_string(),
                    customer_id: new_order.customer_id,
                    table_label: new_order.table_label,
                    status: enum_to_db(&OrderStatus::Open)?,
                    total: new_order.total.to_string(),
                    currency: new_order.currency,
                    note: new_order.note,
                    created_at: now.clone(),
                    updated_at: now,
                };
                let inserted = diesel::insert_into(orders::table)
                    .values(&row)
                    .returning(OrderDB::as_returning())
                    .get_result::<OrderDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::Order,
                        inserted.id.clone(),
                        SyncOperation::Create,
                        serde_json::to_value(&inserted)?,
                    ),
                )?;
                to_order(inserted)
            })
            .await
    }

    async fn update_order(&self, order: Order) -> Result<Order> {
        self.writer
            .exec(move |conn| {
                let row = OrderDB {
                    id: order.id.clone(),
                    customer_id: order.customer_id,
                    table_label: order.table_label,
                    status: enum_to_db(&order.status)?,
                    total: order.total.to_string(),
                    currency: order.currency,
                    note: order.note,
                    created_at: order.created_at,
                    updated_at: Utc::now().to_rfc3339(),
                };
                let updated = diesel::update(orders::table.find(&order.id))
                    .set(&row)
                    .returning(OrderDB::as_returning())
                    .get_result::<OrderDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::Order,
                        updated.id.clone(),
                        SyncOperation::Update,
                        serde_json::to_value(&updated)?,
                    ),
                )?;
                to_order(updated)
            })
            .await
    }

    async fn delete_order(&self, order_id: String) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(orders::table.find(&order_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected > 0 {
                    enqueue_mutation(
                        conn,
                        EnqueueRequest::new(
                            SyncEntity::Order,
                            order_id.clone(),
                            SyncOperation::Delete,
                            serde_json::json!({ "id": order_id }),
                        ),
                    )?;
                }
                Ok(affected)
            })
            .await
    }
}
