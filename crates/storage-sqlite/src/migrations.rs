//! Schema versioning: an explicit `schema_version` table plus an ordered
//! registry of version-to-version transforms.
//!
//! On open, the migrator walks the contiguous chain from the installed
//! version to [`SCHEMA_VERSION`] inside one transaction. When no chain
//! exists the store is destructively recreated empty at the target version;
//! that data loss is deliberate recovery policy for version gaps and is
//! logged loudly.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{info, warn};

use comanda_core::Result;

use crate::errors::StorageError;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i32 = 3;

type Transform = fn(&mut SqliteConnection) -> QueryResult<()>;

/// One step of the upgrade chain.
pub struct Migration {
    pub from_version: i32,
    pub to_version: i32,
    pub name: &'static str,
    pub apply: Transform,
}

/// Outcome of a migrator run, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    UpToDate,
    FreshInstall,
    Migrated { from: i32, steps: usize },
    DestructiveReset { from: i32 },
}

/// Ordered registry of upgrade steps shipped with this build.
pub fn migration_registry() -> Vec<Migration> {
    vec![
        Migration {
            from_version: 1,
            to_version: 2,
            name: "add_customers",
            apply: migrate_v1_to_v2,
        },
        Migration {
            from_version: 2,
            to_version: 3,
            name: "sync_queue_indexes",
            apply: migrate_v2_to_v3,
        },
    ]
}

fn migrate_v1_to_v2(conn: &mut SqliteConnection) -> QueryResult<()> {
    diesel::sql_query(
        "CREATE TABLE customers (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query("ALTER TABLE orders ADD COLUMN customer_id TEXT REFERENCES customers(id)")
        .execute(conn)?;
    Ok(())
}

fn migrate_v2_to_v3(conn: &mut SqliteConnection) -> QueryResult<()> {
    diesel::sql_query(
        "CREATE INDEX idx_sync_queue_entity ON sync_queue(entity_type, entity_id)",
    )
    .execute(conn)?;
    diesel::sql_query("CREATE INDEX idx_sync_queue_status ON sync_queue(status, next_retry_at)")
        .execute(conn)?;
    Ok(())
}

/// Full schema at [`SCHEMA_VERSION`], used for fresh installs and for the
/// destructive reset path. Upgrades of existing installs go through the
/// registry instead.
fn create_current_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    diesel::sql_query(
        "CREATE TABLE schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE menu_items (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            category TEXT,
            price TEXT NOT NULL,
            currency TEXT NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE customers (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE orders (
            id TEXT PRIMARY KEY NOT NULL,
            customer_id TEXT REFERENCES customers(id),
            table_label TEXT,
            status TEXT NOT NULL,
            total TEXT NOT NULL,
            currency TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending_sync',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            next_retry_at TEXT,
            last_error TEXT,
            last_error_code TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE INDEX idx_sync_queue_entity ON sync_queue(entity_type, entity_id)",
    )
    .execute(conn)?;
    diesel::sql_query("CREATE INDEX idx_sync_queue_status ON sync_queue(status, next_retry_at)")
        .execute(conn)?;
    Ok(())
}

#[derive(diesel::QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    version: i32,
}

#[derive(diesel::QueryableByName)]
struct NameRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

fn installed_version(conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
    let has_version_table = !diesel::sql_query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
    )
    .load::<NameRow>(conn)?
    .is_empty();
    if !has_version_table {
        return Ok(None);
    }
    let rows =
        diesel::sql_query("SELECT version FROM schema_version WHERE id = 1").load::<VersionRow>(conn)?;
    Ok(rows.into_iter().next().map(|r| r.version))
}

fn user_tables(conn: &mut SqliteConnection) -> QueryResult<Vec<String>> {
    let rows = diesel::sql_query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .load::<NameRow>(conn)?;
    Ok(rows.into_iter().map(|r| r.name).collect())
}

fn write_version(conn: &mut SqliteConnection, version: i32) -> QueryResult<()> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO schema_version (id, version, updated_at) VALUES (1, {version}, '{now}') \
         ON CONFLICT(id) DO UPDATE SET version = {version}, updated_at = '{now}'"
    );
    diesel::sql_query(sql).execute(conn)?;
    Ok(())
}

pub struct Migrator {
    target_version: i32,
    registry: Vec<Migration>,
}

impl Migrator {
    pub fn new(target_version: i32, registry: Vec<Migration>) -> Self {
        Self {
            target_version,
            registry,
        }
    }

    /// Migrator for the schema this build ships.
    pub fn current() -> Self {
        Self::new(SCHEMA_VERSION, migration_registry())
    }

    /// Contiguous chain from `from` to the target, or `None` when a step is
    /// missing. A version newer than the target has no chain either; that
    /// database belongs to a future build and must go through the reset path
    /// rather than being silently stamped down.
    fn chain_from(&self, from: i32) -> Option<Vec<&Migration>> {
        if from > self.target_version {
            return None;
        }
        let mut chain = Vec::new();
        let mut cursor = from;
        while cursor < self.target_version {
            let step = self
                .registry
                .iter()
                .find(|m| m.from_version == cursor)?;
            cursor = step.to_version;
            chain.push(step);
        }
        Some(chain)
    }

    /// Bring the database to the target version. Must run before any pool
    /// or writer is handed out.
    pub fn run(&self, conn: &mut SqliteConnection) -> Result<MigrationOutcome> {
        let installed = installed_version(conn).map_err(StorageError::from)?;

        match installed {
            Some(version) if version == self.target_version => Ok(MigrationOutcome::UpToDate),
            None if user_tables(conn).map_err(StorageError::from)?.is_empty() => {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|tx| {
                    create_current_schema(tx)?;
                    write_version(tx, self.target_version)
                })
                .map_err(StorageError::from)?;
                info!(
                    "[Storage] Initialized fresh schema at version {}",
                    self.target_version
                );
                Ok(MigrationOutcome::FreshInstall)
            }
            Some(version) if self.chain_from(version).is_some() => {
                // Whole chain in one transaction: an interrupted upgrade
                // leaves the store at the pre-migration version.
                let chain = self.chain_from(version).unwrap_or_default();
                let steps = chain.len();
                conn.immediate_transaction::<_, diesel::result::Error, _>(|tx| {
                    for step in &chain {
                        info!(
                            "[Storage] Applying migration {} ({} -> {})",
                            step.name, step.from_version, step.to_version
                        );
                        (step.apply)(tx)?;
                    }
                    write_version(tx, self.target_version)
                })
                .map_err(StorageError::from)?;
                Ok(MigrationOutcome::Migrated {
                    from: version,
                    steps,
                })
            }
            other => {
                // No upgrade path from the installed version (or tables with
                // no version row). Recreate empty rather than refuse to open.
                let from = other.unwrap_or(0);
                warn!(
                    "[Storage] No migration path from version {} to {}; \
                     destructively recreating the store. All local data is lost.",
                    from, self.target_version
                );
                self.destructive_reset(conn)?;
                Ok(MigrationOutcome::DestructiveReset { from })
            }
        }
    }

    fn destructive_reset(&self, conn: &mut SqliteConnection) -> Result<()> {
        // FK toggling is a no-op inside a transaction, so bracket it.
        diesel::sql_query("PRAGMA foreign_keys = OFF")
            .execute(conn)
            .map_err(StorageError::from)?;
        let reset = conn.immediate_transaction::<_, diesel::result::Error, _>(|tx| {
            for table in user_tables(tx)? {
                let sql = format!("DROP TABLE IF EXISTS `{}`", table.replace('`', "``"));
                diesel::sql_query(sql).execute(tx)?;
            }
            create_current_schema(tx)?;
            write_version(tx, self.target_version)
        });
        let _ = diesel::sql_query("PRAGMA foreign_keys = ON").execute(conn);
        reset.map_err(StorageError::from)?;
        Ok(())
    }
}

/// Open a direct connection to `db_path` and run the shipped migrator.
pub fn run_migrations(db_path: &str) -> Result<MigrationOutcome> {
    let mut conn = SqliteConnection::establish(db_path).map_err(StorageError::from)?;
    Migrator::current().run(&mut conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp_db() -> (tempfile::TempDir, String, SqliteConnection) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("comanda.db").to_string_lossy().to_string();
        let conn = SqliteConnection::establish(&path).expect("establish");
        (dir, path, conn)
    }

    fn table_names(conn: &mut SqliteConnection) -> Vec<String> {
        let mut names = user_tables(conn).expect("tables");
        names.sort();
        names
    }

    fn row_count(conn: &mut SqliteConnection, table: &str) -> i64 {
        #[derive(diesel::QueryableByName)]
        struct CountRow {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            c: i64,
        }
        let sql = format!("SELECT COUNT(*) AS c FROM {table}");
        diesel::sql_query(sql)
            .get_result::<CountRow>(conn)
            .expect("count")
            .c
    }

    #[test]
    fn fresh_install_creates_current_schema() {
        let (_dir, _path, mut conn) = open_temp_db();
        let outcome = Migrator::current().run(&mut conn).expect("run");
        assert_eq!(outcome, MigrationOutcome::FreshInstall);
        assert_eq!(
            installed_version(&mut conn).expect("version"),
            Some(SCHEMA_VERSION)
        );
        let names = table_names(&mut conn);
        for table in ["customers", "menu_items", "orders", "schema_version", "sync_queue"] {
            assert!(names.iter().any(|n| n == table), "missing {table}");
        }
    }

    #[test]
    fn second_run_is_up_to_date() {
        let (_dir, _path, mut conn) = open_temp_db();
        Migrator::current().run(&mut conn).expect("first run");
        let outcome = Migrator::current().run(&mut conn).expect("second run");
        assert_eq!(outcome, MigrationOutcome::UpToDate);
    }

    fn install_v1_schema(conn: &mut SqliteConnection) {
        diesel::sql_query(
            "CREATE TABLE schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), \
             version INTEGER NOT NULL, updated_at TEXT NOT NULL)",
        )
        .execute(conn)
        .expect("schema_version");
        diesel::sql_query(
            "CREATE TABLE menu_items (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
             category TEXT, price TEXT NOT NULL, currency TEXT NOT NULL, \
             is_available INTEGER NOT NULL DEFAULT 1, created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL)",
        )
        .execute(conn)
        .expect("menu_items");
        diesel::sql_query(
            "CREATE TABLE orders (id TEXT PRIMARY KEY NOT NULL, table_label TEXT, \
             status TEXT NOT NULL, total TEXT NOT NULL, currency TEXT NOT NULL, note TEXT, \
             created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
        )
        .execute(conn)
        .expect("orders");
        diesel::sql_query(
            "CREATE TABLE sync_queue (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             entity_type TEXT NOT NULL, entity_id TEXT NOT NULL, operation TEXT NOT NULL, \
             payload TEXT NOT NULL, status TEXT NOT NULL DEFAULT 'pending_sync', \
             attempt_count INTEGER NOT NULL DEFAULT 0, last_attempt_at TEXT, \
             next_retry_at TEXT, last_error TEXT, last_error_code TEXT, \
             created_at TEXT NOT NULL)",
        )
        .execute(conn)
        .expect("sync_queue");
        write_version(conn, 1).expect("version 1");
    }

    #[test]
    fn chain_upgrade_from_v1_preserves_data() {
        let (_dir, _path, mut conn) = open_temp_db();
        install_v1_schema(&mut conn);
        diesel::sql_query(
            "INSERT INTO menu_items (id, name, price, currency, created_at, updated_at) \
             VALUES ('mi-1', 'Espresso', '2.50', 'EUR', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&mut conn)
        .expect("seed row");

        let outcome = Migrator::current().run(&mut conn).expect("run");
        assert_eq!(outcome, MigrationOutcome::Migrated { from: 1, steps: 2 });
        assert_eq!(
            installed_version(&mut conn).expect("version"),
            Some(SCHEMA_VERSION)
        );
        assert_eq!(row_count(&mut conn, "menu_items"), 1);
        assert!(table_names(&mut conn).iter().any(|n| n == "customers"));
    }

    #[test]
    fn interrupted_chain_leaves_pre_migration_version() {
        fn failing_step(conn: &mut SqliteConnection) -> QueryResult<()> {
            // Valid DDL first, then a guaranteed failure: the surrounding
            // transaction must roll both back.
            diesel::sql_query("CREATE TABLE half_migrated (id TEXT)").execute(conn)?;
            diesel::sql_query("CREATE TABLE menu_items (dup TEXT)").execute(conn)?;
            Ok(())
        }

        let (_dir, _path, mut conn) = open_temp_db();
        install_v1_schema(&mut conn);

        let migrator = Migrator::new(
            3,
            vec![
                Migration {
                    from_version: 1,
                    to_version: 2,
                    name: "add_customers",
                    apply: super::migrate_v1_to_v2,
                },
                Migration {
                    from_version: 2,
                    to_version: 3,
                    name: "broken",
                    apply: failing_step,
                },
            ],
        );

        assert!(migrator.run(&mut conn).is_err());
        assert_eq!(installed_version(&mut conn).expect("version"), Some(1));
        let names = table_names(&mut conn);
        assert!(!names.iter().any(|n| n == "half_migrated"));
        assert!(!names.iter().any(|n| n == "customers"));
    }

    #[test]
    fn missing_chain_triggers_destructive_reset() {
        let (_dir, _path, mut conn) = open_temp_db();
        install_v1_schema(&mut conn);
        write_version(&mut conn, 2).expect("pretend v2");
        diesel::sql_query(
            "INSERT INTO menu_items (id, name, price, currency, created_at, updated_at) \
             VALUES ('mi-1', 'Doomed', '1.00', 'EUR', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&mut conn)
        .expect("seed row");

        // Registry only knows 1 -> 2; installed version 2 has no path to 3.
        let migrator = Migrator::new(
            3,
            vec![Migration {
                from_version: 1,
                to_version: 2,
                name: "add_customers",
                apply: super::migrate_v1_to_v2,
            }],
        );

        let outcome = migrator.run(&mut conn).expect("run");
        assert_eq!(outcome, MigrationOutcome::DestructiveReset { from: 2 });
        assert_eq!(installed_version(&mut conn).expect("version"), Some(3));
        assert_eq!(row_count(&mut conn, "menu_items"), 0);
        assert_eq!(row_count(&mut conn, "sync_queue"), 0);
    }

    #[test]
    fn newer_installed_version_triggers_destructive_reset() {
        let (_dir, _path, mut conn) = open_temp_db();
        // A database written by a future build: current tables plus one this
        // build does not know, and a version row ahead of the target.
        Migrator::current().run(&mut conn).expect("baseline");
        diesel::sql_query("CREATE TABLE loyalty_points (id TEXT PRIMARY KEY NOT NULL)")
            .execute(&mut conn)
            .expect("future table");
        diesel::sql_query(
            "INSERT INTO menu_items (id, name, price, currency, created_at, updated_at) \
             VALUES ('mi-1', 'Future', '1.00', 'EUR', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&mut conn)
        .expect("seed row");
        write_version(&mut conn, 5).expect("pretend v5");

        let outcome = Migrator::current().run(&mut conn).expect("run");
        assert_eq!(outcome, MigrationOutcome::DestructiveReset { from: 5 });
        assert_eq!(
            installed_version(&mut conn).expect("version"),
            Some(SCHEMA_VERSION)
        );
        let names = table_names(&mut conn);
        assert!(!names.iter().any(|n| n == "loyalty_points"));
        assert_eq!(row_count(&mut conn, "menu_items"), 0);
    }

    #[test]
    fn tables_without_version_row_also_reset() {
        let (_dir, _path, mut conn) = open_temp_db();
        diesel::sql_query("CREATE TABLE relic (id TEXT)")
            .execute(&mut conn)
            .expect("relic table");

        let outcome = Migrator::current().run(&mut conn).expect("run");
        assert_eq!(outcome, MigrationOutcome::DestructiveReset { from: 0 });
        assert!(!table_names(&mut conn).iter().any(|n| n == "relic"));
        assert_eq!(
            installed_version(&mut conn).expect("version"),
            Some(SCHEMA_VERSION)
        );
    }
}
