//! Human-readable output for the browsing commands

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mlc_core::model::{PlanAction, PlanRow};
use mlc_core::RunContext;

use crate::error::{CliError, CliResult};

/// Directory depth shown in tree mode; deeper levels fold into counts
const TREE_DEPTH: usize = 2;

fn load_plan_view(ctx: &RunContext, duplicates_only: bool, winners_only: bool) -> CliResult<Vec<(PlanRow, PathBuf)>> {
    let mut rows = Vec::new();
    for plan in ctx.db.plans().map_err(|e| CliError::Fatal(e.to_string()))? {
        let Some(file) = ctx
            .db
            .get_file(plan.file_id)
            .map_err(|e| CliError::Fatal(e.to_string()))?
        else {
            continue;
        };
        if duplicates_only || winners_only {
            let member = ctx
                .db
                .member_for_file(plan.file_id)
                .map_err(|e| CliError::Fatal(e.to_string()))?;
            let Some(member) = member else { continue };
            if winners_only && !member.preferred {
                continue;
            }
            if duplicates_only {
                let members = ctx
                    .db
                    .cluster_members(&member.cluster_key)
                    .map_err(|e| CliError::Fatal(e.to_string()))?;
                if members.len() < 2 {
                    continue;
                }
            }
        }
        rows.push((plan, file.src_path));
    }
    Ok(rows)
}

/// Print the plan table
pub fn print_plans(ctx: &RunContext, duplicates_only: bool, winners_only: bool) -> CliResult<()> {
    let rows = load_plan_view(ctx, duplicates_only, winners_only)?;
    if rows.is_empty() {
        println!("No plans recorded; run `mlc plan` first.");
        return Ok(());
    }
    for (plan, src_path) in &rows {
        match plan.action {
            PlanAction::Skip => {
                println!("skip      {}  ({})", src_path.display(), plan.reason);
            }
            action => {
                println!(
                    "{:<9} {}  ->  {}",
                    action.as_str(),
                    src_path.display(),
                    plan.dest_path.display()
                );
            }
        }
    }
    let actions = ctx
        .db
        .count_plans_by_action()
        .map_err(|e| CliError::Fatal(e.to_string()))?;
    let line = actions
        .iter()
        .map(|(action, n)| format!("{action}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("---\n{line}");
    Ok(())
}

/// Print non-skip plans grouped as a destination tree
///
/// Directories deeper than the display depth fold into their ancestor's
/// file count, so the output stays readable for large libraries.
pub fn print_tree(ctx: &RunContext, duplicates_only: bool, winners_only: bool) -> CliResult<()> {
    let rows = load_plan_view(ctx, duplicates_only, winners_only)?;
    let dest_root = ctx.config.destination.clone();
    let mut groups: BTreeMap<PathBuf, u64> = BTreeMap::new();

    for (plan, _) in rows.iter().filter(|(p, _)| p.action != PlanAction::Skip) {
        let rel = plan
            .dest_path
            .strip_prefix(&dest_root)
            .unwrap_or(&plan.dest_path);
        let dir: PathBuf = rel
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .components()
            .take(TREE_DEPTH)
            .collect();
        *groups.entry(dir).or_insert(0) += 1;
    }

    if groups.is_empty() {
        println!("No destination plans to display.");
        return Ok(());
    }
    println!("{}", dest_root.display());
    let total: u64 = groups.values().sum();
    for (dir, count) in &groups {
        if dir.as_os_str().is_empty() {
            println!("  ./  ({count} files)");
        } else {
            println!("  {}/  ({count} files)", dir.display());
        }
    }
    println!("---\n{total} files across {} directories", groups.len());
    Ok(())
}
