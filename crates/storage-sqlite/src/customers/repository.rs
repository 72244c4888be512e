use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use comanda_core::customers::{Customer, CustomerRepositoryTrait, NewCustomer};
use comanda_core::sync::{SyncEntity, SyncOperation};
use comanda_core::Result;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::customers;
use crate::sync_queue::{enqueue_mutation, EnqueueRequest};

use super::model::CustomerDB;

pub struct CustomerRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl CustomerRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl CustomerRepositoryTrait for CustomerRepository {
    fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        let mut conn = get_connection(&self.pool)?;
        let row = customers::table
            .find(customer_id)
            .first::<CustomerDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(Customer::from))
    }

    fn list_customers(&self) -> Result<Vec<Customer>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = customers::table
            .order(customers::name.asc())
            .load::<CustomerDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(Customer::from).collect())
    }

    async fn insert_customer(&self, new_customer: NewCustomer) -> Result<Customer> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let row = CustomerDB {
                    id: Uuid::new_v4().to_string(),
                    name: new_customer.name,
                    email: new_customer.email,
                    phone: new_customer.phone,
                    created_at: now.clone(),
                    updated_at: now,
                };
                let inserted = diesel::insert_into(customers::table)
                    .values(&row)
                    .returning(CustomerDB::as_returning())
                    .get_result::<CustomerDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::Customer,
                        inserted.id.clone(),
                        SyncOperation::Create,
                        serde_json::to_value(&inserted)?,
                    ),
                )?;
                Ok(Customer::from(inserted))
            })
            .await
    }

    async fn update_customer(&self, customer: Customer) -> Result<Customer> {
        self.writer
            .exec(move |conn| {
                let row = CustomerDB {
                    id: customer.id.clone(),
                    name: customer.name,
                    email: customer.email,
                    phone: customer.phone,
                    created_at: customer.created_at,
                    updated_at: Utc::now().to_rfc3339(),
                };
                let updated = diesel::update(customers::table.find(&customer.id))
                    .set(&row)
                    .returning(CustomerDB::as_returning())
                    .get_result::<CustomerDB>(conn)
                    .map_err(StorageError::from)?;
                enqueue_mutation(
                    conn,
                    EnqueueRequest::new(
                        SyncEntity::Customer,
                        updated.id.clone(),
                        SyncOperation::Update,
                        serde_json::to_value(&updated)?,
                    ),
                )?;
                Ok(Customer::from(updated))
            })
            .await
    }

    async fn delete_customer(&self, customer_id: String) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                let affected = diesel::delete(customers::table.find(&customer_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if affected > 0 {
                    enqueue_mutation(
                        conn,
                        EnqueueRequest::new(
                            SyncEntity::Customer,
                            customer_id.clone(),
                            SyncOperation::Delete,
                            serde_json::json!({ "id": customer_id }),
                        ),
                    )?;
                }
                Ok(affected)
            })
            .await
    }
}
