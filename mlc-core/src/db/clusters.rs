//! Cluster and member operations

use rusqlite::params;

use super::error::{DatabaseError, DbResult};
use super::Database;
use crate::model::{ClusterMemberRow, ClusterRow};

impl Database {
    /// Remove every cluster, member, and the clustering checkpoint
    ///
    /// # Errors
    /// Propagates transaction failures.
    pub fn truncate_clusters(&self) -> DbResult<()> {
        self.in_transaction(|tx| {
            tx.execute("DELETE FROM cluster_members", [])
                .map_err(DatabaseError::from)?;
            tx.execute("DELETE FROM clusters", [])
                .map_err(DatabaseError::from)?;
            tx.execute("DELETE FROM clustering_progress", [])
                .map_err(DatabaseError::from)?;
            Ok(())
        })
    }

    /// Insert a batch of clusters in one transaction
    ///
    /// Re-runs upsert the hint; keys are primary.
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn insert_cluster_batch(&self, rows: &[ClusterRow]) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO clusters (cluster_key, hint) VALUES (?1, ?2)
                     ON CONFLICT(cluster_key) DO UPDATE SET hint = excluded.hint",
                )
                .map_err(DatabaseError::from)?;
            for row in rows {
                stmt.execute(params![row.cluster_key, row.hint]).map_err(|e| {
                    DatabaseError::BatchFailed {
                        table: "clusters",
                        rows: rows.len(),
                        message: e.to_string(),
                    }
                })?;
            }
            Ok(())
        })
    }

    /// Insert a batch of cluster members in one transaction
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn insert_cluster_member_batch(&self, rows: &[ClusterMemberRow]) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO cluster_members
                         (cluster_key, file_id, quality_score, preferred)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(DatabaseError::from)?;
            for row in rows {
                stmt.execute(params![
                    row.cluster_key,
                    row.file_id,
                    row.quality_score,
                    row.preferred
                ])
                .map_err(|e| DatabaseError::BatchFailed {
                    table: "cluster_members",
                    rows: rows.len(),
                    message: e.to_string(),
                })?;
            }
            Ok(())
        })
    }

    /// Every cluster, ordered by key
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn clusters(&self) -> DbResult<Vec<ClusterRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT cluster_key, hint FROM clusters ORDER BY cluster_key")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ClusterRow {
                    cluster_key: row.get(0)?,
                    hint: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Members of one cluster, ordered by file id
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn cluster_members(&self, cluster_key: &str) -> DbResult<Vec<ClusterMemberRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT cluster_key, file_id, quality_score, preferred
             FROM cluster_members WHERE cluster_key = ?1 ORDER BY file_id",
        )?;
        let rows = stmt
            .query_map([cluster_key], |row| {
                Ok(ClusterMemberRow {
                    cluster_key: row.get(0)?,
                    file_id: row.get(1)?,
                    quality_score: row.get(2)?,
                    preferred: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Membership row for one file, if clustered
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn member_for_file(&self, file_id: i64) -> DbResult<Option<ClusterMemberRow>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT cluster_key, file_id, quality_score, preferred
             FROM cluster_members WHERE file_id = ?1",
        )?;
        let row = stmt
            .query_row([file_id], |row| {
                Ok(ClusterMemberRow {
                    cluster_key: row.get(0)?,
                    file_id: row.get(1)?,
                    quality_score: row.get(2)?,
                    preferred: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Store a member's quality score
    ///
    /// # Errors
    /// Propagates the update failure.
    pub fn update_member_score(&self, cluster_key: &str, file_id: i64, score: f64) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE cluster_members SET quality_score = ?3
             WHERE cluster_key = ?1 AND file_id = ?2",
            params![cluster_key, file_id, score],
        )?;
        Ok(())
    }

    /// Mark one member preferred, clearing any previous winner
    ///
    /// The two updates share a transaction so the at-most-one-preferred
    /// invariant holds even under interruption.
    ///
    /// # Errors
    /// Propagates transaction failures.
    pub fn update_member_preferred(&self, cluster_key: &str, file_id: i64) -> DbResult<()> {
        self.in_transaction(|tx| {
            tx.execute(
                "UPDATE cluster_members SET preferred = 0 WHERE cluster_key = ?1",
                params![cluster_key],
            )
            .map_err(DatabaseError::from)?;
            tx.execute(
                "UPDATE cluster_members SET preferred = 1
                 WHERE cluster_key = ?1 AND file_id = ?2",
                params![cluster_key, file_id],
            )
            .map_err(DatabaseError::from)?;
            Ok(())
        })
    }

    /// Total cluster count
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn count_clusters(&self) -> DbResult<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM clusters", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Clusters holding more than one member (actual duplicates)
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn count_duplicate_clusters(&self) -> DbResult<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT cluster_key FROM cluster_members
                 GROUP BY cluster_key HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_file;
    use super::*;

    fn member(key: &str, file_id: i64) -> ClusterMemberRow {
        ClusterMemberRow {
            cluster_key: key.into(),
            file_id,
            quality_score: 0.0,
            preferred: false,
        }
    }

    #[test]
    fn cluster_and_member_batches_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_file(&db, "a", "/in/a.flac", 1, 0);
        let b = seed_file(&db, "b", "/in/b.mp3", 2, 0);

        db.insert_cluster_batch(&[ClusterRow {
            cluster_key: "abba|sos|studio|300|disc0|track4".into(),
            hint: "ABBA - SOS".into(),
        }])
        .unwrap();
        db.insert_cluster_member_batch(&[
            member("abba|sos|studio|300|disc0|track4", a.id),
            member("abba|sos|studio|300|disc0|track4", b.id),
        ])
        .unwrap();

        assert_eq!(db.count_clusters().unwrap(), 1);
        assert_eq!(db.count_duplicate_clusters().unwrap(), 1);
        assert_eq!(
            db.cluster_members("abba|sos|studio|300|disc0|track4")
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn preferred_is_exclusive_per_cluster() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_file(&db, "a", "/in/a.flac", 1, 0);
        let b = seed_file(&db, "b", "/in/b.mp3", 2, 0);
        db.insert_cluster_batch(&[ClusterRow {
            cluster_key: "k".into(),
            hint: String::new(),
        }])
        .unwrap();
        db.insert_cluster_member_batch(&[member("k", a.id), member("k", b.id)])
            .unwrap();

        db.update_member_preferred("k", a.id).unwrap();
        db.update_member_preferred("k", b.id).unwrap();

        let members = db.cluster_members("k").unwrap();
        let preferred: Vec<_> = members.iter().filter(|m| m.preferred).collect();
        assert_eq!(preferred.len(), 1);
        assert_eq!(preferred[0].file_id, b.id);
    }

    #[test]
    fn truncate_clears_everything() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_file(&db, "a", "/in/a.flac", 1, 0);
        db.insert_cluster_batch(&[ClusterRow {
            cluster_key: "k".into(),
            hint: String::new(),
        }])
        .unwrap();
        db.insert_cluster_member_batch(&[member("k", a.id)]).unwrap();
        db.truncate_clusters().unwrap();
        assert_eq!(db.count_clusters().unwrap(), 0);
        assert!(db.member_for_file(a.id).unwrap().is_none());
    }
}
