//! Execution row operations

use rusqlite::{params, OptionalExtension, Row};

use super::error::DbResult;
use super::Database;
use crate::model::ExecutionRow;

fn map_execution_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        file_id: row.get(0)?,
        ok: row.get(1)?,
        bytes_written: row.get::<_, i64>(2)?.max(0) as u64,
        verify_hash: row.get(3)?,
        error: row.get(4)?,
        duration_ms: row.get::<_, i64>(5)?.max(0) as u64,
    })
}

impl Database {
    /// Record an executor attempt
    ///
    /// A failure may be overwritten by a later retry run; a success is final
    /// (the pending-executions selector never offers the file again).
    ///
    /// # Errors
    /// Propagates the upsert failure.
    pub fn upsert_execution(&self, row: &ExecutionRow) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO executions
                 (file_id, ok, bytes_written, verify_hash, error, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.file_id,
                row.ok,
                row.bytes_written as i64,
                row.verify_hash,
                row.error,
                row.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    /// Execution row for one file
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn get_execution(&self, file_id: i64) -> DbResult<Option<ExecutionRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT file_id, ok, bytes_written, verify_hash, error, duration_ms
             FROM executions WHERE file_id = ?1",
        )?;
        let row = stmt.query_row([file_id], map_execution_row).optional()?;
        Ok(row)
    }

    /// Every execution, ordered by file id
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn executions(&self) -> DbResult<Vec<ExecutionRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, ok, bytes_written, verify_hash, error, duration_ms
             FROM executions ORDER BY file_id",
        )?;
        let rows = stmt
            .query_map([], map_execution_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_file;
    use super::*;

    #[test]
    fn failure_then_success_overwrites() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_file(&db, "a", "/in/a.flac", 10, 0);

        db.upsert_execution(&ExecutionRow {
            file_id: a.id,
            ok: false,
            bytes_written: 0,
            verify_hash: None,
            error: Some("ETIMEDOUT".into()),
            duration_ms: 5,
        })
        .unwrap();
        db.upsert_execution(&ExecutionRow {
            file_id: a.id,
            ok: true,
            bytes_written: 10,
            verify_hash: Some("abcd".into()),
            error: None,
            duration_ms: 9,
        })
        .unwrap();

        let row = db.get_execution(a.id).unwrap().unwrap();
        assert!(row.ok);
        assert_eq!(row.bytes_written, 10);
        assert_eq!(row.verify_hash.as_deref(), Some("abcd"));
        assert_eq!(db.executions().unwrap().len(), 1);
    }
}
