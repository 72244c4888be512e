//! Order domain model and repository contract.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Order lifecycle status as persisted in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Completed,
    Voided,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_id: Option<String>,
    pub table_label: Option<String>,
    pub status: OrderStatus,
    pub total: Decimal,
    pub currency: String,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_id: Option<String>,
    pub table_label: Option<String>,
    pub total: Decimal,
    pub currency: String,
    pub note: Option<String>,
}

#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    fn get_order(&self, order_id: &str) -> Result<Option<Order>>;
    fn list_orders(&self) -> Result<Vec<Order>>;
    async fn insert_order(&self, new_order: NewOrder) -> Result<Order>;
    async fn update_order(&self, order: Order) -> Result<Order>;
    async fn delete_order(&self, order_id: String) -> Result<usize>;
}
