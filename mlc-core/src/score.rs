//! Stage 4: scoring and winner election
//!
//! Assigns every cluster member a quality score from its codec, bitrate,
//! bit depth, sample rate, tag completeness and size, then elects exactly
//! one winner per cluster under a total order so re-runs pick the same file.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::model::{FileRow, TrackMetadata};
use crate::run::{ErrorTally, RunContext};

/// One scored member, carrying what the tie-breakers need
#[derive(Debug, Clone)]
pub struct ScoredMember {
    /// Member file row
    pub file: FileRow,
    /// Assigned quality score
    pub score: f64,
}

/// Codec-tier points: lossless families first, then per-codec lossy tables
fn codec_points(meta: &TrackMetadata) -> f64 {
    let codec = meta.codec.as_deref().unwrap_or("").to_lowercase();
    if meta.lossless {
        return match codec.as_str() {
            "flac" | "alac" | "wav" => 40.0,
            c if c.starts_with("pcm") => 40.0,
            "ape" | "wavpack" => 35.0,
            "tta" => 30.0,
            _ => 30.0,
        };
    }
    let bitrate = meta.bitrate_kbps.unwrap_or(0);
    match codec.as_str() {
        "aac" => match bitrate {
            b if b >= 256 => 25.0,
            b if b >= 192 => 22.0,
            b if b >= 128 => 18.0,
            _ => 15.0,
        },
        "mp3" => match bitrate {
            b if b >= 320 => 20.0,
            b if b >= 256 => 18.0,
            b if b >= 192 => 15.0,
            b if b >= 128 => 12.0,
            _ => 8.0,
        },
        "opus" => match bitrate {
            b if b >= 192 => 24.0,
            b if b >= 128 => 22.0,
            b if b >= 96 => 18.0,
            _ => 15.0,
        },
        "vorbis" => match bitrate {
            b if b >= 192 => 22.0,
            b if b >= 128 => 20.0,
            b if b >= 96 => 16.0,
            _ => 13.0,
        },
        _ => 10.0,
    }
}

fn bit_depth_points(meta: &TrackMetadata) -> f64 {
    match meta.bit_depth {
        Some(d) if d >= 24 => 5.0,
        Some(d) if d >= 20 => 3.0,
        Some(d) if d >= 16 => 0.0,
        Some(_) => -2.0,
        None => 0.0,
    }
}

fn sample_rate_points(meta: &TrackMetadata) -> f64 {
    match meta.sample_rate_hz {
        Some(r) if r >= 96_000 => 5.0,
        Some(r) if r >= 48_000 => 2.0,
        Some(r) if r >= 44_100 => 0.0,
        Some(r) if r >= 32_000 => -1.0,
        Some(_) => -3.0,
        None => 0.0,
    }
}

fn tag_points(meta: &TrackMetadata) -> f64 {
    let core = meta.core_tag_count();
    let bonus = if core == 4 { 1 } else { 0 };
    f64::from(core + bonus)
}

fn size_points(meta: &TrackMetadata, size_bytes: u64) -> f64 {
    if !meta.lossless {
        return 0.0;
    }
    if size_bytes > 50 << 20 {
        2.0
    } else if size_bytes > 20 << 20 {
        1.0
    } else {
        0.0
    }
}

/// Quality score for one member; higher is better
#[must_use]
pub fn quality_score(meta: &TrackMetadata, size_bytes: u64) -> f64 {
    let mut score = codec_points(meta);
    score += bit_depth_points(meta);
    score += sample_rate_points(meta);
    if meta.lossless {
        score += 10.0;
    }
    score += tag_points(meta);
    score += size_points(meta, size_bytes);
    score
}

/// Total order for winner election: higher score, then larger size, then
/// older mtime, then lexicographically smaller source path
fn winner_order(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.file.size_bytes.cmp(&a.file.size_bytes))
        .then_with(|| a.file.mtime_unix.cmp(&b.file.mtime_unix))
        .then_with(|| a.file.src_path.cmp(&b.file.src_path))
}

/// Elect the winner among scored members
///
/// Deterministic: the tie-breakers form a total order, so the same multiset
/// of members always elects the same file.
#[must_use]
pub fn select_winner(members: &[ScoredMember]) -> Option<&ScoredMember> {
    members.iter().min_by(|a, b| winner_order(a, b))
}

/// Result of a scoring stage
#[derive(Debug, Clone, Default)]
pub struct ScoreSummary {
    /// Clusters processed
    pub clusters_scored: u64,
    /// Members scored
    pub members_scored: u64,
    /// Clusters holding duplicates
    pub duplicate_clusters: u64,
    /// Failure tally
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

/// Scores members and writes the preferred flag
pub struct Scorer {
    ctx: RunContext,
}

impl Scorer {
    /// Build the scorer for a run
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Score every cluster member and elect each cluster's winner
    ///
    /// # Errors
    /// Returns store errors from cluster enumeration; per-member problems
    /// are tallied, not propagated.
    pub fn run(&self) -> Result<ScoreSummary> {
        let start = Instant::now();
        let db = &self.ctx.db;
        let clusters = db.clusters()?;
        let mut summary = ScoreSummary::default();

        for cluster in &clusters {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            let members = db.cluster_members(&cluster.cluster_key)?;
            if members.is_empty() {
                continue;
            }
            if members.len() > 1 {
                summary.duplicate_clusters += 1;
                self.ctx.events.record(
                    EventRecord::new(EventLevel::Warning, EventKind::Duplicate)
                        .cluster_key(cluster.cluster_key.clone()),
                );
            }

            let mut scored = Vec::with_capacity(members.len());
            for member in &members {
                let (file, meta) = match (db.get_file(member.file_id), db.get_metadata(member.file_id)) {
                    (Ok(Some(file)), Ok(Some(meta))) => (file, meta),
                    _ => {
                        summary
                            .errors
                            .push(format!("cluster {}: member {} has no metadata", cluster.cluster_key, member.file_id));
                        continue;
                    }
                };
                let score = quality_score(&meta, file.size_bytes);
                db.update_member_score(&cluster.cluster_key, file.id, score)?;
                scored.push(ScoredMember { file, score });
            }

            let Some(winner) = select_winner(&scored) else {
                continue;
            };
            db.update_member_preferred(&cluster.cluster_key, winner.file.id)?;
            let winner_id = winner.file.id;
            for member in &scored {
                let mut record = EventRecord::new(EventLevel::Info, EventKind::Score)
                    .file_key(member.file.file_key.clone())
                    .cluster_key(cluster.cluster_key.clone());
                record.quality_score = Some(member.score);
                record.is_winner = Some(member.file.id == winner_id);
                self.ctx.events.record(record);
            }
            summary.clusters_scored += 1;
            summary.members_scored += scored.len() as u64;
        }

        summary.duration = start.elapsed();
        log::info!(
            "Scoring complete: {} clusters, {} members, {} duplicate clusters in {:.1?}",
            summary.clusters_scored,
            summary.members_scored,
            summary.duplicate_clusters,
            summary.duration
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::seed_file_with_metadata;
    use crate::db::Database;
    use crate::events::EventLog;
    use crate::model::{ClusterMemberRow, ClusterRow};
    use std::sync::Arc;

    fn flac_meta() -> TrackMetadata {
        TrackMetadata {
            codec: Some("flac".into()),
            lossless: true,
            sample_rate_hz: Some(44_100),
            bit_depth: Some(16),
            duration_ms: Some(300_000),
            artist: Some("ABBA".into()),
            album: Some("Arrival".into()),
            title: Some("SOS".into()),
            track_no: Some(4),
            ..Default::default()
        }
    }

    fn mp3_meta(bitrate: u32) -> TrackMetadata {
        TrackMetadata {
            codec: Some("mp3".into()),
            bitrate_kbps: Some(bitrate),
            sample_rate_hz: Some(44_100),
            duration_ms: Some(300_400),
            artist: Some("Abba".into()),
            title: Some("SOS".into()),
            ..Default::default()
        }
    }

    fn member(file: FileRow, score: f64) -> ScoredMember {
        ScoredMember { file, score }
    }

    fn file_at(id: i64, path: &str, size: u64, mtime: i64) -> FileRow {
        FileRow {
            id,
            ..FileRow::discovered(format!("k{id}"), path.into(), size, mtime)
        }
    }

    #[test]
    fn score_table_flac_beats_mp3() {
        // 16/44.1 flac with full core tags, 40 MiB:
        // 40 codec + 0 depth + 0 rate + 10 lossless + 4 tags + 1 bonus + 1 size = 56
        let flac = quality_score(&flac_meta(), 40 << 20);
        assert!((flac - 56.0).abs() < f64::EPSILON);

        // mp3 320 with artist+title only: 20 + 2 tags = 22
        let mp3 = quality_score(&mp3_meta(320), 9 << 20);
        assert!((mp3 - 22.0).abs() < f64::EPSILON);
        assert!(flac > mp3);
    }

    #[test]
    fn score_rewards_bit_depth_and_rate() {
        let mut hires = flac_meta();
        hires.bit_depth = Some(24);
        hires.sample_rate_hz = Some(96_000);
        // +5 depth +5 rate over the 16/44.1 flac, same 1-point size bonus
        assert!(
            (quality_score(&hires, 40 << 20) - quality_score(&flac_meta(), 40 << 20) - 10.0).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn lossy_tiers_follow_bitrate() {
        assert!(quality_score(&mp3_meta(320), 0) > quality_score(&mp3_meta(192), 0));
        assert!(quality_score(&mp3_meta(192), 0) > quality_score(&mp3_meta(96), 0));

        let mut opus = mp3_meta(192);
        opus.codec = Some("opus".into());
        assert!(quality_score(&opus, 0) > quality_score(&mp3_meta(192), 0));
    }

    #[test]
    fn size_bonus_only_for_lossless() {
        let big_mp3 = quality_score(&mp3_meta(320), 60 << 20);
        let small_mp3 = quality_score(&mp3_meta(320), 1 << 20);
        assert!((big_mp3 - small_mp3).abs() < f64::EPSILON);

        let big_flac = quality_score(&flac_meta(), 60 << 20);
        let small_flac = quality_score(&flac_meta(), 1 << 20);
        assert!((big_flac - small_flac - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn winner_tie_breakers_are_total() {
        // Equal score: larger size wins.
        let a = member(file_at(1, "/in/a.flac", 100, 50), 50.0);
        let b = member(file_at(2, "/in/b.flac", 200, 50), 50.0);
        assert_eq!(select_winner(&[a.clone(), b.clone()]).unwrap().file.id, 2);

        // Equal score and size: older mtime wins.
        let c = member(file_at(3, "/in/c.flac", 100, 10), 50.0);
        assert_eq!(select_winner(&[a.clone(), c.clone()]).unwrap().file.id, 3);

        // Equal everything: smaller path wins.
        let d = member(file_at(4, "/in/aa.flac", 100, 50), 50.0);
        assert_eq!(select_winner(&[a.clone(), d]).unwrap().file.id, 1);

        // Determinism: order of the slice does not matter.
        let winner_ab = select_winner(&[a.clone(), b.clone()]).unwrap().file.id;
        let winner_ba = select_winner(&[b, a]).unwrap().file.id;
        assert_eq!(winner_ab, winner_ba);
    }

    #[test]
    fn run_elects_exactly_one_winner_per_cluster() {
        let ctx = RunContext::new(
            Config::default(),
            Database::open_in_memory().unwrap(),
            Arc::new(EventLog::null()),
        );
        let flac = seed_file_with_metadata(&ctx.db, "a", "/in/a/01.flac", 40 << 20, 100, &flac_meta());
        let mp3 = seed_file_with_metadata(&ctx.db, "b", "/in/b/sos.mp3", 9 << 20, 200, &mp3_meta(320));

        let key = "abba|sos|studio|300|disc0|track0";
        ctx.db
            .insert_cluster_batch(&[ClusterRow {
                cluster_key: key.into(),
                hint: "ABBA - SOS".into(),
            }])
            .unwrap();
        ctx.db
            .insert_cluster_member_batch(&[
                ClusterMemberRow {
                    cluster_key: key.into(),
                    file_id: flac.id,
                    quality_score: 0.0,
                    preferred: false,
                },
                ClusterMemberRow {
                    cluster_key: key.into(),
                    file_id: mp3.id,
                    quality_score: 0.0,
                    preferred: false,
                },
            ])
            .unwrap();

        let summary = Scorer::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.clusters_scored, 1);
        assert_eq!(summary.members_scored, 2);
        assert_eq!(summary.duplicate_clusters, 1);

        let members = ctx.db.cluster_members(key).unwrap();
        let winners: Vec<_> = members.iter().filter(|m| m.preferred).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].file_id, flac.id);
        assert!(members.iter().all(|m| m.quality_score > 0.0));
    }
}
