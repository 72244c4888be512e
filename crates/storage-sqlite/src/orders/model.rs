use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OrderDB {
    pub id: String,
    pub customer_id: Option<String>,
    pub table_label: Option<String>,
    pub status: String,
    pub total: String,
    pub currency: String,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
