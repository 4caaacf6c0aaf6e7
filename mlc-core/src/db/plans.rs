//! Plan row operations

use rusqlite::{params, Row};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::error::{DatabaseError, DbResult};
use super::Database;
use crate::model::{FileRow, FileStatus, PlanAction, PlanRow};

fn map_plan_row(row: &Row<'_>) -> rusqlite::Result<PlanRow> {
    let action: String = row.get(2)?;
    Ok(PlanRow {
        file_id: row.get(0)?,
        dest_path: PathBuf::from(row.get::<_, String>(1)?),
        action: action.parse().unwrap_or(PlanAction::Skip),
        reason: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
    })
}

impl Database {
    /// Upsert a batch of plans in one transaction
    ///
    /// The planner is idempotent; repeated runs overwrite prior rows.
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn upsert_plan_batch(&self, rows: &[PlanRow]) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO plans (file_id, dest_path, action, reason)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(DatabaseError::from)?;
            for row in rows {
                stmt.execute(params![
                    row.file_id,
                    row.dest_path.to_string_lossy(),
                    row.action.as_str(),
                    row.reason,
                ])
                .map_err(|e| DatabaseError::BatchFailed {
                    table: "plans",
                    rows: rows.len(),
                    message: e.to_string(),
                })?;
            }
            Ok(())
        })
    }

    /// Every plan, ordered by file id
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn plans(&self) -> DbResult<Vec<PlanRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT file_id, dest_path, action, reason FROM plans ORDER BY file_id")?;
        let rows = stmt
            .query_map([], map_plan_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remove every plan (used before a fresh planning pass)
    ///
    /// # Errors
    /// Propagates the delete failure.
    pub fn truncate_plans(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM plans", [])?;
        Ok(())
    }

    /// Per-action plan counts
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn count_plans_by_action(&self) -> DbResult<BTreeMap<String, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT action, COUNT(*) FROM plans GROUP BY action")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counts)
    }

    /// Plans the executor still has to run: non-skip, no successful execution
    ///
    /// Paired with their file rows so the executor can verify against size
    /// and clean up status. Ordered by file id for deterministic pickup.
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn pending_executions(&self) -> DbResult<Vec<(PlanRow, FileRow)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.file_id, p.dest_path, p.action, p.reason,
                    f.id, f.file_key, f.src_path, f.size_bytes, f.mtime_unix, f.status, f.error
             FROM plans p
             JOIN files f ON f.id = p.file_id
             LEFT JOIN executions e ON e.file_id = p.file_id AND e.ok = 1
             WHERE p.action != 'skip' AND e.file_id IS NULL
             ORDER BY p.file_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let plan = map_plan_row(row)?;
                let status: String = row.get(9)?;
                let file = FileRow {
                    id: row.get(4)?,
                    file_key: row.get(5)?,
                    src_path: PathBuf::from(row.get::<_, String>(6)?),
                    size_bytes: row.get::<_, i64>(7)?.max(0) as u64,
                    mtime_unix: row.get(8)?,
                    status: status.parse().unwrap_or(FileStatus::Error),
                    error: row.get(10)?,
                };
                Ok((plan, file))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
