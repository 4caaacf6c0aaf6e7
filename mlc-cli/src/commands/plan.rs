//! `mlc plan`: clustering, scoring and destination planning

use std::sync::Arc;

use mlc_core::config::Config;
use mlc_core::normalize::musicbrainz::{self, MusicBrainzNormalizer};
use mlc_core::{CancelToken, Clusterer, Planner, Scorer};

use super::{build_context, finish, report_errors};
use crate::error::{CliError, CliResult};
use crate::output;

pub fn run(
    config: Config,
    cancel: &CancelToken,
    dry_run: bool,
    force_recluster: bool,
) -> CliResult<()> {
    let mut ctx = build_context(config, cancel, true)?;
    if ctx.config.musicbrainz {
        let normalizer = MusicBrainzNormalizer::new()
            .map_err(|e| CliError::Fatal(format!("cannot build MusicBrainz client: {e}")))?;
        ctx = ctx.with_normalizer(Arc::new(normalizer));
        log::info!("MusicBrainz artist canonicalization enabled");

        if ctx.config.musicbrainz_preload {
            let artists = ctx
                .db
                .distinct_artists()
                .map_err(|e| CliError::Fatal(e.to_string()))?;
            log::info!("Preloading canonical names for {} artists", artists.len());
            for artist in &artists {
                if cancel.is_cancelled() {
                    break;
                }
                let _ = musicbrainz::canonical_name(&ctx.db, ctx.normalizer(), artist);
            }
        }
    }

    let cluster = Clusterer::new(ctx.clone())
        .force_recluster(force_recluster)
        .run()?;
    if cluster.skipped_existing {
        println!(
            "Cluster: {} clusters already present ({} with duplicates); use --force-recluster to redo",
            cluster.clusters, cluster.duplicate_clusters
        );
    } else {
        println!(
            "Cluster: {} clusters ({} with duplicates) from {} files{} ({:.1?})",
            cluster.clusters,
            cluster.duplicate_clusters,
            cluster.files_processed,
            if cluster.resumed { ", resumed" } else { "" },
            cluster.duration
        );
    }
    report_errors("cluster", &cluster.errors);

    let score = Scorer::new(ctx.clone()).run()?;
    println!(
        "Score: {} members across {} clusters ({:.1?})",
        score.members_scored, score.clusters_scored, score.duration
    );
    report_errors("score", &score.errors);

    let plan = Planner::new(ctx.clone()).run()?;
    println!(
        "Plan: {} actions, {} skips, {} conflicts ({:.1?})",
        plan.planned, plan.skipped, plan.conflicts, plan.duration
    );
    report_errors("plan", &plan.errors);

    if dry_run {
        println!();
        output::print_plans(&ctx, false, false)?;
        println!("(dry run: no files were touched)");
    }

    finish(cluster.errors.count + score.errors.count + plan.errors.count)
}
