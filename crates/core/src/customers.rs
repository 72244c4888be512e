//! Customer domain model and repository contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[async_trait]
pub trait CustomerRepositoryTrait: Send + Sync {
    fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>>;
    fn list_customers(&self) -> Result<Vec<Customer>>;
    async fn insert_customer(&self, new_customer: NewCustomer) -> Result<Customer>;
    async fn update_customer(&self, customer: Customer) -> Result<Customer>;
    async fn delete_customer(&self, customer_id: String) -> Result<usize>;
}
