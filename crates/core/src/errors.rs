//! Shared error type for the comanda core and its storage implementations.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Database-level failure taxonomy.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Top-level error for core and storage operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_message_includes_detail() {
        let err = Error::Database(DatabaseError::Migration("no path from 2 to 3".into()));
        assert_eq!(
            err.to_string(),
            "Database error: Migration failed: no path from 2 to 3"
        );
    }
}
