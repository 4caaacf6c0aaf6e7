//! Database error types

use thiserror::Error;

/// Errors surfaced by the state store
#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    /// Underlying SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Pool or file-open failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A batch transaction rolled back
    #[error("Batch write failed ({table}, {rows} rows): {message}")]
    BatchFailed {
        /// Target table
        table: &'static str,
        /// Rows in the failed batch
        rows: usize,
        /// Underlying failure
        message: String,
    },

    /// Schema migration failure
    #[error("Migration {version} failed: {message}")]
    MigrationFailed {
        /// Migration version
        version: u32,
        /// Underlying failure
        message: String,
    },

    /// Row lookup found nothing where one was required
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Stored value could not be mapped onto its model type
    #[error("Row decode failed: {0}")]
    Decode(String),
}

/// Result alias for store operations
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err.to_string())
    }
}

impl From<r2d2::Error> for DatabaseError {
    fn from(err: r2d2::Error) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}
