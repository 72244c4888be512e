//! Storage error type and its conversion into the core error taxonomy.

use comanda_core::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Diesel(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::Pool(e) => Error::Database(DatabaseError::Pool(e.to_string())),
            StorageError::Connection(e) => Error::Database(DatabaseError::Pool(e.to_string())),
            StorageError::Migration(msg) => Error::Database(DatabaseError::Migration(msg)),
            StorageError::Io(e) => Error::Database(DatabaseError::Internal(e.to_string())),
        }
    }
}
