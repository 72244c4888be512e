use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::menu_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MenuItemDB {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub price: String,
    pub currency: String,
    pub is_available: i32,
    pub created_at: String,
    pub updated_at: String,
}
