//! Clustering checkpoint operations
//!
//! A singleton row recording how far an interrupted clustering run got.
//! Present only while a run is in flight; erased on successful completion.

use rusqlite::{params, OptionalExtension};

use super::error::DbResult;
use super::Database;
use crate::model::ClusteringProgress;

impl Database {
    /// Current checkpoint, if a clustering run was interrupted
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn clustering_progress(&self) -> DbResult<Option<ClusteringProgress>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT last_processed_file_id, files_processed, total_files, clusters_so_far
                 FROM clustering_progress WHERE id = 1",
                [],
                |row| {
                    Ok(ClusteringProgress {
                        last_processed_file_id: row.get(0)?,
                        files_processed: row.get::<_, i64>(1)?.max(0) as u64,
                        total_files: row.get::<_, i64>(2)?.max(0) as u64,
                        clusters_so_far: row.get::<_, i64>(3)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Write (or overwrite) the checkpoint
    ///
    /// # Errors
    /// Propagates the upsert failure.
    pub fn save_clustering_progress(&self, progress: &ClusteringProgress) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO clustering_progress
                 (id, last_processed_file_id, files_processed, total_files, clusters_so_far)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                progress.last_processed_file_id,
                progress.files_processed as i64,
                progress.total_files as i64,
                progress.clusters_so_far as i64,
            ],
        )?;
        Ok(())
    }

    /// Erase the checkpoint after a completed run
    ///
    /// # Errors
    /// Propagates the delete failure.
    pub fn clear_clustering_progress(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM clustering_progress", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_and_clears() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.clustering_progress().unwrap().is_none());

        let progress = ClusteringProgress {
            last_processed_file_id: 1000,
            files_processed: 1000,
            total_files: 2000,
            clusters_so_far: 640,
        };
        db.save_clustering_progress(&progress).unwrap();
        assert_eq!(db.clustering_progress().unwrap(), Some(progress));

        // Overwrite is allowed; there is only one slot.
        let later = ClusteringProgress {
            last_processed_file_id: 1500,
            ..progress
        };
        db.save_clustering_progress(&later).unwrap();
        assert_eq!(db.clustering_progress().unwrap(), Some(later));

        db.clear_clustering_progress().unwrap();
        assert!(db.clustering_progress().unwrap().is_none());
    }
}
