//! Connection pool management and the single-connection write actor.

use std::path::PathBuf;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use comanda_core::Result;

use crate::errors::StorageError;

pub mod write_actor;

pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const DB_FILE_NAME: &str = "comanda.db";

/// Per-connection pragmas. WAL keeps readers unblocked while the write
/// actor commits; the busy timeout covers the WAL checkpoint window.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Ensure the data directory exists and return the database file path.
pub fn init(app_data_dir: &str) -> Result<String> {
    let dir = PathBuf::from(app_data_dir);
    std::fs::create_dir_all(&dir).map_err(StorageError::from)?;
    Ok(dir.join(DB_FILE_NAME).to_string_lossy().to_string())
}

/// Build the read pool. Migrations must already have run against `db_path`.
pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(8)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(StorageError::Pool)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &Arc<DbPool>) -> Result<DbConnection> {
    Ok(pool.get().map_err(StorageError::Pool)?)
}
