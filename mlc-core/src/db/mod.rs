//! Embedded state store
//!
//! A single SQLite file holds every persistent entity of the pipeline and
//! doubles as the resume log and audit trail. Connections come from a small
//! r2d2 pool; each stage funnels its writes through one batch-writer thread
//! while readers use separate pool connections.

pub mod error;
mod migrations;

mod artist_cache;
mod clusters;
mod executions;
mod files;
mod metadata;
mod plans;
mod progress;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;

pub use self::error::{DatabaseError, DbResult};
pub use self::migrations::current_version;

/// Pragma profile applied to every pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreTuning {
    /// Local disk: full durability
    #[default]
    Local,
    /// Network filesystem: relaxed sync, bigger cache, long busy timeout
    Network,
}

impl StoreTuning {
    fn pragma_sql(self) -> &'static str {
        match self {
            Self::Local => {
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = FULL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA cache_size = -2000;
                 PRAGMA temp_store = memory;"
            }
            Self::Network => {
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 30000;
                 PRAGMA cache_size = -8000;
                 PRAGMA temp_store = memory;"
            }
        }
    }
}

/// Pooled handle to the state database
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (creating if needed) the state database at `path`
    ///
    /// Parent directories are created. The tuning profile picks the pragma
    /// set; correctness is identical in both profiles.
    ///
    /// # Errors
    /// Returns `ConnectionFailed` when the file cannot be opened and
    /// `MigrationFailed` when the schema cannot be brought up to date.
    pub fn open(path: &Path, tuning: StoreTuning) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
            }
        }
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| conn.execute_batch(tuning.pragma_sql()));
        Self::build(manager)
    }

    /// In-memory database for tests
    ///
    /// # Errors
    /// Returns `ConnectionFailed` when the pool cannot be built.
    pub fn open_in_memory() -> DbResult<Self> {
        // A single shared connection; :memory: databases are per-connection.
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(DatabaseError::from)?;
        let db = Self { pool: Arc::new(pool) };
        let mut conn = db.conn()?;
        migrations::run_migrations(&mut conn)?;
        Ok(db)
    }

    fn build(manager: SqliteConnectionManager) -> DbResult<Self> {
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(DatabaseError::from)?;
        let db = Self { pool: Arc::new(pool) };
        let mut conn = db.conn()?;
        migrations::run_migrations(&mut conn)?;
        log::debug!("State store ready (schema v{})", current_version(&conn)?);
        Ok(db)
    }

    pub(crate) fn conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(DatabaseError::from)
    }

    /// Current schema version (diagnostics)
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn schema_version(&self) -> DbResult<u32> {
        let conn = self.conn()?;
        current_version(&conn)
    }

    /// Run a closure inside a single transaction
    ///
    /// Used by every batch writer: all-or-nothing per batch.
    pub(crate) fn in_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join(".mlc/state.db");
        let db = Database::open(&db_path, StoreTuning::Local).unwrap();
        assert!(db_path.exists());
        drop(db);
    }

    #[test]
    fn network_tuning_opens_fine() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("s.db"), StoreTuning::Network).unwrap();
        let conn = db.conn().unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 30_000);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: DbResult<()> = db.in_transaction(|tx| {
            tx.execute(
                "INSERT INTO clusters (cluster_key, hint) VALUES ('k', 'h')",
                [],
            )
            .map_err(DatabaseError::from)?;
            Err(DatabaseError::Sqlite("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.count_clusters().unwrap(), 0);
    }
}
