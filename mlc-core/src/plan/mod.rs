//! Stage 4½: planning
//!
//! Turns scored clusters into concrete operations: one plan per winner with
//! a rendered destination path, one skip per loser, and deterministic
//! resolution when two winners sanitize onto the same destination. Planning
//! is idempotent; every run rebuilds the plan table from current state.

pub mod layout;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::DuplicatePolicy;
use crate::error::Result;
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::model::{PlanAction, PlanRow};
use crate::run::{ErrorTally, RunContext};

/// Result of a planning stage
#[derive(Debug, Clone, Default)]
pub struct PlanSummary {
    /// Plans with a transfer action
    pub planned: u64,
    /// Skip plans (losers, conflicts, policy)
    pub skipped: u64,
    /// Destination conflicts resolved
    pub conflicts: u64,
    /// Failure tally
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

struct WinnerCandidate {
    file_id: i64,
    score: f64,
    dest: PathBuf,
    file_key: String,
    src_path: PathBuf,
}

/// Derives destination plans from scored clusters
pub struct Planner {
    ctx: RunContext,
}

impl Planner {
    /// Build the planner for a run
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Produce a plan row for every cluster member
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the destination is unset and store
    /// errors from enumeration or the final batch write.
    pub fn run(&self) -> Result<PlanSummary> {
        self.ctx.config.validate_destination()?;
        let start = Instant::now();
        let db = &self.ctx.db;
        let dest_root = self.ctx.config.destination.clone();
        let action = PlanAction::from(self.ctx.config.mode);
        let mut summary = PlanSummary::default();

        let mut plans: Vec<PlanRow> = Vec::new();
        let mut winners: Vec<WinnerCandidate> = Vec::new();

        for cluster in db.clusters()? {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            let members = db.cluster_members(&cluster.cluster_key)?;
            let Some(winner) = members.iter().find(|m| m.preferred) else {
                if !members.is_empty() {
                    summary.errors.push(format!(
                        "cluster {} has no winner; run scoring first",
                        cluster.cluster_key
                    ));
                }
                continue;
            };

            let (Ok(Some(file)), Ok(Some(meta))) =
                (db.get_file(winner.file_id), db.get_metadata(winner.file_id))
            else {
                summary.errors.push(format!(
                    "cluster {}: winner {} rows missing",
                    cluster.cluster_key, winner.file_id
                ));
                continue;
            };
            let dest = layout::render(&self.ctx.config.layout, &dest_root, &meta, &file);
            winners.push(WinnerCandidate {
                file_id: file.id,
                score: winner.quality_score,
                dest,
                file_key: file.file_key.clone(),
                src_path: file.src_path.clone(),
            });

            for loser in members.iter().filter(|m| m.file_id != winner.file_id) {
                let reason = match self.ctx.config.duplicate_policy {
                    DuplicatePolicy::Keep => format!(
                        "duplicate (lower score): cluster kept file {}",
                        winner.file_id
                    ),
                    policy => format!(
                        "duplicate (lower score): cluster kept file {}; policy {policy:?} pending",
                        winner.file_id
                    ),
                };
                plans.push(PlanRow {
                    file_id: loser.file_id,
                    dest_path: PathBuf::new(),
                    action: PlanAction::Skip,
                    reason,
                });
                summary.skipped += 1;
            }
        }

        // Destination conflicts: two winners rendering to one path keep the
        // higher score; ties keep the earlier file id so re-runs agree.
        let mut by_dest: HashMap<PathBuf, usize> = HashMap::new();
        let mut conflicted: Vec<(usize, i64)> = Vec::new();
        for (idx, candidate) in winners.iter().enumerate() {
            match by_dest.get(&candidate.dest) {
                None => {
                    by_dest.insert(candidate.dest.clone(), idx);
                }
                Some(&held_idx) => {
                    let held = &winners[held_idx];
                    let candidate_wins = match candidate.score.partial_cmp(&held.score) {
                        Some(std::cmp::Ordering::Greater) => true,
                        Some(std::cmp::Ordering::Equal) => candidate.file_id < held.file_id,
                        _ => false,
                    };
                    if candidate_wins {
                        conflicted.push((held_idx, candidate.file_id));
                        by_dest.insert(candidate.dest.clone(), idx);
                    } else {
                        conflicted.push((idx, held.file_id));
                    }
                }
            }
        }
        summary.conflicts = conflicted.len() as u64;
        let conflicted: HashMap<usize, i64> = conflicted.into_iter().collect();

        for (idx, winner) in winners.iter().enumerate() {
            if let Some(kept_id) = conflicted.get(&idx) {
                self.ctx.events.record(
                    EventRecord::new(EventLevel::Warning, EventKind::Plan)
                        .file_key(winner.file_key.clone())
                        .error(format!(
                            "conflict: {} also claimed by file {kept_id}",
                            winner.dest.display()
                        )),
                );
                plans.push(PlanRow {
                    file_id: winner.file_id,
                    dest_path: PathBuf::new(),
                    action: PlanAction::Skip,
                    reason: format!("conflict: destination claimed by file {kept_id}"),
                });
                summary.skipped += 1;
                continue;
            }

            if self.ctx.config.prefer_existing && winner.dest.exists() {
                plans.push(PlanRow {
                    file_id: winner.file_id,
                    dest_path: winner.dest.clone(),
                    action: PlanAction::Skip,
                    reason: "destination already exists".to_string(),
                });
                summary.skipped += 1;
                continue;
            }

            let mut record = EventRecord::new(EventLevel::Info, EventKind::Plan)
                .file_key(winner.file_key.clone())
                .src_path(&winner.src_path);
            record.action = Some(action.as_str().to_string());
            self.ctx.events.record(record);
            plans.push(PlanRow {
                file_id: winner.file_id,
                dest_path: winner.dest.clone(),
                action,
                reason: String::new(),
            });
            summary.planned += 1;
        }

        db.truncate_plans()?;
        db.upsert_plan_batch(&plans)?;

        summary.duration = start.elapsed();
        log::info!(
            "Planning complete: {} planned, {} skipped, {} conflicts in {:.1?}",
            summary.planned,
            summary.skipped,
            summary.conflicts,
            summary.duration
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TransferMode};
    use crate::db::test_support::seed_file_with_metadata;
    use crate::db::Database;
    use crate::events::EventLog;
    use crate::model::{ClusterMemberRow, ClusterRow, TrackMetadata};
    use std::sync::Arc;

    fn ctx_with_dest(dest: &str) -> RunContext {
        let config = Config {
            source: "/in".into(),
            destination: dest.into(),
            mode: TransferMode::Copy,
            ..Default::default()
        };
        RunContext::new(config, Database::open_in_memory().unwrap(), Arc::new(EventLog::null()))
    }

    fn meta(artist: &str, title: &str) -> TrackMetadata {
        TrackMetadata {
            artist: Some(artist.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    fn seed_cluster(ctx: &RunContext, key: &str, members: &[(i64, f64, bool)]) {
        ctx.db
            .insert_cluster_batch(&[ClusterRow {
                cluster_key: key.into(),
                hint: String::new(),
            }])
            .unwrap();
        let rows: Vec<ClusterMemberRow> = members
            .iter()
            .map(|(file_id, score, preferred)| ClusterMemberRow {
                cluster_key: key.into(),
                file_id: *file_id,
                quality_score: *score,
                preferred: *preferred,
            })
            .collect();
        ctx.db.insert_cluster_member_batch(&rows).unwrap();
    }

    #[test]
    fn winner_planned_loser_skipped() {
        let ctx = ctx_with_dest("/out");
        let flac =
            seed_file_with_metadata(&ctx.db, "a", "/in/a/01.flac", 40 << 20, 0, &meta("ABBA", "SOS"));
        let mp3 =
            seed_file_with_metadata(&ctx.db, "b", "/in/b/sos.mp3", 9 << 20, 0, &meta("Abba", "SOS"));
        seed_cluster(&ctx, "k", &[(flac.id, 56.0, true), (mp3.id, 22.0, false)]);

        let summary = Planner::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.planned, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.conflicts, 0);

        let plans = ctx.db.plans().unwrap();
        let winner_plan = plans.iter().find(|p| p.file_id == flac.id).unwrap();
        assert_eq!(winner_plan.action, PlanAction::Copy);
        assert_eq!(winner_plan.dest_path, PathBuf::from("/out/ABBA/SOS.flac"));

        let loser_plan = plans.iter().find(|p| p.file_id == mp3.id).unwrap();
        assert_eq!(loser_plan.action, PlanAction::Skip);
        assert!(loser_plan.reason.contains("duplicate (lower score)"));
        assert!(loser_plan.dest_path.as_os_str().is_empty());
    }

    #[test]
    fn conflicting_destinations_keep_higher_score() {
        let ctx = ctx_with_dest("/out");
        // Different recordings whose titles sanitize onto one path.
        let hi = seed_file_with_metadata(&ctx.db, "a", "/in/a.flac", 1, 0, &meta("X", "Same: Name"));
        let lo = seed_file_with_metadata(&ctx.db, "b", "/in/b.flac", 1, 0, &meta("X", "Same? Name"));
        seed_cluster(&ctx, "k1", &[(hi.id, 56.0, true)]);
        seed_cluster(&ctx, "k2", &[(lo.id, 40.0, true)]);

        let summary = Planner::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.planned, 1);
        assert_eq!(summary.conflicts, 1);

        let plans = ctx.db.plans().unwrap();
        let kept = plans.iter().find(|p| p.file_id == hi.id).unwrap();
        assert_eq!(kept.action, PlanAction::Copy);
        let dropped = plans.iter().find(|p| p.file_id == lo.id).unwrap();
        assert_eq!(dropped.action, PlanAction::Skip);
        assert!(dropped.reason.contains("conflict"));
    }

    #[test]
    fn non_skip_plans_have_unique_destinations() {
        let ctx = ctx_with_dest("/out");
        let a = seed_file_with_metadata(&ctx.db, "a", "/in/a.flac", 1, 0, &meta("X", "One"));
        let b = seed_file_with_metadata(&ctx.db, "b", "/in/b.flac", 1, 0, &meta("X", "One"));
        let c = seed_file_with_metadata(&ctx.db, "c", "/in/c.flac", 1, 0, &meta("X", "Two"));
        seed_cluster(&ctx, "k1", &[(a.id, 50.0, true)]);
        seed_cluster(&ctx, "k2", &[(b.id, 50.0, true)]);
        seed_cluster(&ctx, "k3", &[(c.id, 50.0, true)]);

        Planner::new(ctx.clone()).run().unwrap();
        let plans = ctx.db.plans().unwrap();
        let dests: Vec<_> = plans
            .iter()
            .filter(|p| p.action != PlanAction::Skip)
            .map(|p| p.dest_path.clone())
            .collect();
        let mut deduped = dests.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(dests.len(), deduped.len());
        // Equal scores: the earlier file id holds the destination.
        assert!(plans.iter().any(|p| p.file_id == a.id && p.action != PlanAction::Skip));
    }

    #[test]
    fn replanning_is_idempotent() {
        let ctx = ctx_with_dest("/out");
        let a = seed_file_with_metadata(&ctx.db, "a", "/in/a.flac", 1, 0, &meta("X", "One"));
        seed_cluster(&ctx, "k1", &[(a.id, 50.0, true)]);

        Planner::new(ctx.clone()).run().unwrap();
        let first = ctx.db.plans().unwrap();
        Planner::new(ctx.clone()).run().unwrap();
        let second = ctx.db.plans().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_destination_is_config_error() {
        let ctx = ctx_with_dest("");
        assert!(Planner::new(ctx).run().is_err());
    }
}
