//! Stage 3: clustering
//!
//! Groups extracted files into recordings by normalized identity plus
//! duration bucket. The run is resumable at row granularity: every 1000
//! files the accumulated groups are flushed to the store and a checkpoint
//! row records the high-water file id, so a cancelled run continues where it
//! stopped instead of starting over.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::model::{ClusterMemberRow, ClusterRow, ClusteringProgress, FileRow, FileStatus, TrackMetadata};
use crate::normalize::{self, musicbrainz};
use crate::run::{ErrorTally, RunContext};

/// Files between checkpoints
const CHECKPOINT_INTERVAL: u64 = 1000;
/// Clusters per insert transaction
const CLUSTER_BATCH: usize = 1000;
/// Members per insert transaction
const MEMBER_BATCH: usize = 5000;

/// Result of a clustering stage
#[derive(Debug, Clone, Default)]
pub struct ClusterSummary {
    /// Files folded into clusters this run
    pub files_processed: u64,
    /// Total clusters in the store afterwards
    pub clusters: u64,
    /// Clusters with more than one member
    pub duplicate_clusters: u64,
    /// Whether an interrupted run was resumed
    pub resumed: bool,
    /// Whether clustering was skipped because results already exist
    pub skipped_existing: bool,
    /// Failure tally
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

/// Build the canonical cluster key for one file
///
/// Format `artist|title|version|bucket|discD|trackN`, all segments
/// lowercase-normalized. Disc and track default to 0 so untitled tracks of
/// one album stay apart instead of collapsing into a single cluster.
#[must_use]
pub fn cluster_key(meta: &TrackMetadata, file: &FileRow, canonical_artist: Option<&str>) -> String {
    let raw_artist = canonical_artist
        .map(str::to_string)
        .or_else(|| meta.artist.clone())
        .unwrap_or_default();
    let mut artist = normalize::normalize_artist(&raw_artist);

    let raw_title = meta.title.clone().unwrap_or_default();
    let mut title = normalize::normalize_title(&raw_title);

    // With neither artist nor title the filename is the only identity left.
    if artist.is_empty() && title.is_empty() {
        let stem = file
            .src_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        title = normalize::normalize_title(stem);
    }
    if artist.is_empty() {
        artist = "unknown".to_string();
    }
    if title.is_empty() {
        title = "unknown".to_string();
    }

    let version = normalize::detect_version_type(&raw_title);
    let bucket = normalize::bucket_duration(meta.duration_ms.unwrap_or(0));
    let disc = meta.disc_no.unwrap_or(0);
    let track = meta.track_no.unwrap_or(0);

    format!("{artist}|{title}|{version}|{bucket}|disc{disc}|track{track}")
}

/// Duration-bucketed identity grouper
pub struct Clusterer {
    ctx: RunContext,
    force_recluster: bool,
}

impl Clusterer {
    /// Build the clusterer for a run
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            force_recluster: false,
        }
    }

    /// Discard existing clusters and start fresh
    #[must_use]
    pub fn force_recluster(mut self, force: bool) -> Self {
        self.force_recluster = force;
        self
    }

    /// Run clustering over every `meta_ok` file
    ///
    /// # Errors
    /// Returns store errors from selection or batch writes; per-file
    /// metadata gaps are tallied, not propagated.
    pub fn run(&self) -> Result<ClusterSummary> {
        let start = Instant::now();
        let db = &self.ctx.db;

        let progress = db.clustering_progress()?;
        let existing_clusters = db.count_clusters()?;

        // Completed results with no checkpoint mean a previous run finished;
        // leave them alone unless the caller forces a redo.
        if existing_clusters > 0 && progress.is_none() && !self.force_recluster {
            log::info!(
                "Clustering already complete ({existing_clusters} clusters); use force to redo"
            );
            return Ok(ClusterSummary {
                clusters: existing_clusters,
                duplicate_clusters: db.count_duplicate_clusters()?,
                skipped_existing: true,
                duration: start.elapsed(),
                ..Default::default()
            });
        }

        let resume_from = if self.force_recluster {
            db.truncate_clusters()?;
            None
        } else if let Some(progress) = progress {
            log::info!(
                "Resuming clustering after file id {} ({} files already processed)",
                progress.last_processed_file_id,
                progress.files_processed
            );
            Some(progress)
        } else {
            db.truncate_clusters()?;
            None
        };

        let files = db.files_with_status(&[FileStatus::MetaOk])?;
        let total_files = files.len() as u64;
        let mut summary = ClusterSummary {
            resumed: resume_from.is_some(),
            ..Default::default()
        };
        // File ids start at 1, so 0 means "nothing processed yet".
        let mut files_processed = resume_from.map_or(0, |p| p.files_processed);
        let last_done = resume_from.map_or(0, |p| p.last_processed_file_id);

        // ClusterMap: key -> members gathered since the last flush.
        let mut cluster_map: HashMap<String, (String, Vec<i64>)> = HashMap::new();
        let mut since_checkpoint = 0u64;
        let mut last_file_id = last_done;
        let mut cancelled = false;

        for file in &files {
            if file.id <= last_done {
                continue;
            }
            if self.ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let meta = match db.get_metadata(file.id) {
                Ok(Some(meta)) => meta,
                Ok(None) => {
                    // meta_ok without a metadata row violates the store
                    // invariant; record and move on.
                    summary
                        .errors
                        .push(format!("{}: missing metadata row", file.src_path.display()));
                    continue;
                }
                Err(e) => {
                    summary.errors.push(e.to_string());
                    continue;
                }
            };

            let canonical = meta.artist.as_deref().map(|artist| {
                musicbrainz::canonical_name(db, self.ctx.normalizer(), artist)
            });
            let key = cluster_key(&meta, file, canonical.as_deref());
            let hint = format!(
                "{} - {}",
                meta.artist.as_deref().unwrap_or("?"),
                meta.title.as_deref().unwrap_or("?")
            );
            self.ctx.events.record(
                EventRecord::new(EventLevel::Debug, EventKind::Cluster)
                    .file_key(file.file_key.clone())
                    .cluster_key(key.clone()),
            );
            cluster_map
                .entry(key)
                .or_insert_with(|| (hint, Vec::new()))
                .1
                .push(file.id);

            files_processed += 1;
            since_checkpoint += 1;
            last_file_id = file.id;

            if since_checkpoint >= CHECKPOINT_INTERVAL {
                self.flush(&mut cluster_map, &mut summary.errors)?;
                db.save_clustering_progress(&ClusteringProgress {
                    last_processed_file_id: last_file_id,
                    files_processed,
                    total_files,
                    clusters_so_far: db.count_clusters()?,
                })?;
                since_checkpoint = 0;
            }
        }

        self.flush(&mut cluster_map, &mut summary.errors)?;

        if cancelled {
            db.save_clustering_progress(&ClusteringProgress {
                last_processed_file_id: last_file_id,
                files_processed,
                total_files,
                clusters_so_far: db.count_clusters()?,
            })?;
            log::warn!("Clustering cancelled; checkpoint saved at file id {last_file_id}");
        } else {
            db.clear_clustering_progress()?;
        }

        summary.files_processed = files_processed;
        summary.clusters = db.count_clusters()?;
        summary.duplicate_clusters = db.count_duplicate_clusters()?;
        summary.duration = start.elapsed();
        log::info!(
            "Clustering complete: {} clusters ({} with duplicates) from {} files in {:.1?}",
            summary.clusters,
            summary.duplicate_clusters,
            summary.files_processed,
            summary.duration
        );
        Ok(summary)
    }

    /// Flush the in-memory map to the store and clear it
    fn flush(
        &self,
        cluster_map: &mut HashMap<String, (String, Vec<i64>)>,
        errors: &mut ErrorTally,
    ) -> Result<()> {
        if cluster_map.is_empty() {
            return Ok(());
        }
        let mut clusters: Vec<ClusterRow> = cluster_map
            .iter()
            .map(|(key, (hint, _))| ClusterRow {
                cluster_key: key.clone(),
                hint: hint.clone(),
            })
            .collect();
        clusters.sort_by(|a, b| a.cluster_key.cmp(&b.cluster_key));
        let mut members: Vec<ClusterMemberRow> = cluster_map
            .iter()
            .flat_map(|(key, (_, file_ids))| {
                file_ids.iter().map(move |file_id| ClusterMemberRow {
                    cluster_key: key.clone(),
                    file_id: *file_id,
                    quality_score: 0.0,
                    preferred: false,
                })
            })
            .collect();
        members.sort_by(|a, b| (&a.cluster_key, a.file_id).cmp(&(&b.cluster_key, b.file_id)));

        for chunk in clusters.chunks(CLUSTER_BATCH) {
            if let Err(e) = self.ctx.db.insert_cluster_batch(chunk) {
                log::error!("Cluster batch insert failed: {e}");
                errors.push(e.to_string());
            }
        }
        for chunk in members.chunks(MEMBER_BATCH) {
            if let Err(e) = self.ctx.db.insert_cluster_member_batch(chunk) {
                log::error!("Member batch insert failed: {e}");
                errors.push(e.to_string());
            }
        }
        cluster_map.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::seed_file_with_metadata;
    use crate::db::Database;
    use crate::events::EventLog;
    use std::sync::Arc;

    fn test_ctx() -> RunContext {
        RunContext::new(
            Config::default(),
            Database::open_in_memory().unwrap(),
            Arc::new(EventLog::null()),
        )
    }

    fn meta(artist: &str, title: &str, duration_ms: u64) -> TrackMetadata {
        TrackMetadata {
            artist: Some(artist.into()),
            title: Some(title.into()),
            duration_ms: Some(duration_ms),
            ..Default::default()
        }
    }

    #[test]
    fn key_shape_and_defaults() {
        let file = FileRow::discovered("k".into(), "/in/x.flac".into(), 1, 0);
        let key = cluster_key(&meta("ABBA", "SOS", 300_000), &file, None);
        assert_eq!(key, "abba|sos|studio|300|disc0|track0");

        let mut with_numbers = meta("ABBA", "SOS", 300_000);
        with_numbers.disc_no = Some(1);
        with_numbers.track_no = Some(4);
        assert_eq!(
            cluster_key(&with_numbers, &file, None),
            "abba|sos|studio|300|disc1|track4"
        );
    }

    #[test]
    fn untagged_file_keys_from_filename() {
        let file = FileRow::discovered("k".into(), "/in/Mystery Song.flac".into(), 1, 0);
        let key = cluster_key(&TrackMetadata::default(), &file, None);
        assert_eq!(key, "unknown|mystery song|studio|0|disc0|track0");
    }

    #[test]
    fn same_identity_same_cluster() {
        let ctx = test_ctx();
        // Same recording: case-variant artist, duration 400ms apart.
        seed_file_with_metadata(&ctx.db, "a", "/in/a/01.flac", 40 << 20, 100, &meta("ABBA", "SOS", 300_000));
        seed_file_with_metadata(&ctx.db, "b", "/in/b/sos.mp3", 9 << 20, 200, &meta("Abba", "SOS", 300_400));

        let summary = Clusterer::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.clusters, 1);
        assert_eq!(summary.duplicate_clusters, 1);
        assert!(ctx.db.clustering_progress().unwrap().is_none());
    }

    #[test]
    fn version_and_duration_split_clusters() {
        let ctx = test_ctx();
        seed_file_with_metadata(&ctx.db, "a", "/in/Song.flac", 1, 0, &meta("X", "Song", 220_000));
        seed_file_with_metadata(&ctx.db, "b", "/in/Song (Live).flac", 1, 0, &meta("X", "Song (Live)", 310_000));

        let summary = Clusterer::new(ctx).run().unwrap();
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.duplicate_clusters, 0);
    }

    #[test]
    fn second_run_skips_and_force_redoes() {
        let ctx = test_ctx();
        seed_file_with_metadata(&ctx.db, "a", "/in/a.flac", 1, 0, &meta("X", "A", 100_000));

        let first = Clusterer::new(ctx.clone()).run().unwrap();
        assert!(!first.skipped_existing);
        assert_eq!(first.clusters, 1);

        let second = Clusterer::new(ctx.clone()).run().unwrap();
        assert!(second.skipped_existing);
        assert_eq!(second.clusters, 1);

        let forced = Clusterer::new(ctx).force_recluster(true).run().unwrap();
        assert!(!forced.skipped_existing);
        assert_eq!(forced.clusters, 1);
    }

    #[test]
    fn cancelled_run_resumes_to_identical_result() {
        let uninterrupted = {
            let ctx = test_ctx();
            for i in 0..20 {
                seed_file_with_metadata(
                    &ctx.db,
                    &format!("k{i}"),
                    &format!("/in/{i:02}.flac"),
                    1,
                    0,
                    &meta("X", &format!("Track {}", i % 10), 100_000),
                );
            }
            Clusterer::new(ctx).run().unwrap().clusters
        };

        let ctx = test_ctx();
        for i in 0..20 {
            seed_file_with_metadata(
                &ctx.db,
                &format!("k{i}"),
                &format!("/in/{i:02}.flac"),
                1,
                0,
                &meta("X", &format!("Track {}", i % 10), 100_000),
            );
        }
        // Simulate an interrupted run: half the files processed, checkpoint
        // saved, map flushed.
        let files = ctx.db.files_with_status(&[FileStatus::MetaOk]).unwrap();
        let halfway = Clusterer::new(ctx.clone());
        let mut partial: HashMap<String, (String, Vec<i64>)> = HashMap::new();
        for file in files.iter().take(10) {
            let m = ctx.db.get_metadata(file.id).unwrap().unwrap();
            let key = cluster_key(&m, file, None);
            partial.entry(key).or_insert_with(|| (String::new(), Vec::new())).1.push(file.id);
        }
        let mut errors = ErrorTally::default();
        halfway.flush(&mut partial, &mut errors).unwrap();
        ctx.db
            .save_clustering_progress(&ClusteringProgress {
                last_processed_file_id: files[9].id,
                files_processed: 10,
                total_files: 20,
                clusters_so_far: ctx.db.count_clusters().unwrap(),
            })
            .unwrap();

        let resumed = Clusterer::new(ctx.clone()).run().unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.clusters, uninterrupted);
        assert!(ctx.db.clustering_progress().unwrap().is_none());
    }
}
