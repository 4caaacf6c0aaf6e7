//! File row operations

use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use super::error::{DatabaseError, DbResult};
use super::Database;
use crate::model::{FileRow, FileStatus};

fn map_file_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    let status: String = row.get(5)?;
    Ok(FileRow {
        id: row.get(0)?,
        file_key: row.get(1)?,
        src_path: PathBuf::from(row.get::<_, String>(2)?),
        size_bytes: row.get::<_, i64>(3)?.max(0) as u64,
        mtime_unix: row.get(4)?,
        status: status.parse().unwrap_or(FileStatus::Error),
        error: row.get(6)?,
    })
}

const FILE_COLUMNS: &str = "id, file_key, src_path, size_bytes, mtime_unix, status, error";

impl Database {
    /// Insert a batch of discovered files in one transaction
    ///
    /// Rows whose `file_key` already exists are skipped (`INSERT OR IGNORE`);
    /// the return value counts rows actually inserted. The batch is
    /// all-or-nothing: any other failure rolls the whole batch back.
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn insert_file_batch(&self, rows: &[FileRow]) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.in_transaction(|tx| {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO files (file_key, src_path, size_bytes, mtime_unix, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(DatabaseError::from)?;
            let mut inserted = 0u64;
            for row in rows {
                let n = stmt
                    .execute(params![
                        row.file_key,
                        row.src_path.to_string_lossy(),
                        row.size_bytes as i64,
                        row.mtime_unix,
                        row.status.as_str(),
                    ])
                    .map_err(|e| DatabaseError::BatchFailed {
                        table: "files",
                        rows: rows.len(),
                        message: e.to_string(),
                    })?;
                inserted += n as u64;
            }
            Ok(inserted)
        })
    }

    /// All known file keys, for the scanner's de-dup guard
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn load_file_keys(&self) -> DbResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT file_key FROM files")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(keys)
    }

    /// Look a file up by its stable key
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn get_file_by_key(&self, file_key: &str) -> DbResult<Option<FileRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {FILE_COLUMNS} FROM files WHERE file_key = ?1"))?;
        let row = stmt.query_row([file_key], map_file_row).optional()?;
        Ok(row)
    }

    /// Look a file up by id
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn get_file(&self, id: i64) -> DbResult<Option<FileRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"))?;
        let row = stmt.query_row([id], map_file_row).optional()?;
        Ok(row)
    }

    /// Files in any of the given statuses, ordered by id
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn files_with_status(&self, statuses: &[FileStatus]) -> DbResult<Vec<FileRow>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE status IN ({placeholders}) ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), map_file_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Update status (and optional error text) for a batch of files
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn update_file_status_batch(
        &self,
        updates: &[(i64, FileStatus, Option<String>)],
    ) -> DbResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let mut stmt = tx
                .prepare_cached("UPDATE files SET status = ?2, error = ?3 WHERE id = ?1")
                .map_err(DatabaseError::from)?;
            for (id, status, error) in updates {
                stmt.execute(params![id, status.as_str(), error])
                    .map_err(|e| DatabaseError::BatchFailed {
                        table: "files",
                        rows: updates.len(),
                        message: e.to_string(),
                    })?;
            }
            Ok(())
        })
    }

    /// Per-status file counts
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn count_files_by_status(&self) -> DbResult<BTreeMap<String, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM files GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counts)
    }
}
