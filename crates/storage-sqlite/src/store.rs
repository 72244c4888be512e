//! Explicitly constructed store handle.
//!
//! Lifecycle is owned by whoever bootstraps the process: `open` runs the
//! schema migrator before any pool or writer exists, then hands out
//! repositories sharing the pool and the write actor. There is no global
//! database handle.

use std::sync::Arc;

use log::info;

use comanda_core::Result;

use crate::customers::CustomerRepository;
use crate::db::{self, DbPool, WriteHandle};
use crate::menu::MenuItemRepository;
use crate::migrations;
use crate::orders::OrderRepository;
use crate::sync_queue::SyncQueueRepository;

pub struct SqliteStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteStore {
    /// Open (creating if needed) the database under `app_data_dir` and
    /// bring it to the current schema version.
    pub fn open(app_data_dir: &str) -> Result<Self> {
        let db_path = db::init(app_data_dir)?;
        let outcome = migrations::run_migrations(&db_path)?;
        info!("[Storage] Opened {} ({:?})", db_path, outcome);

        let pool = db::create_pool(&db_path)?;
        let writer = db::spawn_writer(pool.as_ref().clone());
        Ok(Self { pool, writer })
    }

    pub fn pool(&self) -> Arc<DbPool> {
        Arc::clone(&self.pool)
    }

    pub fn writer(&self) -> WriteHandle {
        self.writer.clone()
    }

    pub fn menu_items(&self) -> MenuItemRepository {
        MenuItemRepository::new(self.pool(), self.writer())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool(), self.writer())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool(), self.writer())
    }

    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool(), self.writer())
    }
}
