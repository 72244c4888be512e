//! Menu item domain model and repository contract.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub is_available: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMenuItem {
    pub name: String,
    pub category: Option<String>,
    pub price: Decimal,
    pub currency: String,
}

#[async_trait]
pub trait MenuItemRepositoryTrait: Send + Sync {
    fn get_menu_item(&self, item_id: &str) -> Result<Option<MenuItem>>;
    fn list_menu_items(&self) -> Result<Vec<MenuItem>>;
    async fn insert_menu_item(&self, new_item: NewMenuItem) -> Result<MenuItem>;
    async fn update_menu_item(&self, item: MenuItem) -> Result<MenuItem>;
    async fn delete_menu_item(&self, item_id: String) -> Result<usize>;
}
