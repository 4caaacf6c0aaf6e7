//! `mlc report`: Markdown run summary
//!
//! A pure reader of the state store: aggregates file statuses, cluster
//! counts, plan actions and execution outcomes into
//! `artifacts/reports/<timestamp>/summary.md`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use mlc_core::config::Config;
use mlc_core::model::FileStatus;
use mlc_core::{CancelToken, RunContext};

use super::{build_context, ARTIFACTS_DIR};
use crate::error::{CliError, CliResult};

pub fn run(config: &Config, out: Option<&Path>) -> CliResult<()> {
    let ctx = build_context(config.clone(), &CancelToken::new(), false)?;

    let dir = match out {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from(ARTIFACTS_DIR)
            .join("reports")
            .join(Local::now().format("%Y%m%d-%H%M%S").to_string()),
    };
    fs::create_dir_all(&dir)?;
    let path = dir.join("summary.md");

    let markdown = render(&ctx).map_err(|e| CliError::Fatal(e.to_string()))?;
    fs::write(&path, markdown)?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn render(ctx: &RunContext) -> Result<String, mlc_core::AppError> {
    let db = &ctx.db;
    let mut out = String::new();
    let _ = writeln!(out, "# Library cleaning summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);

    let _ = writeln!(out, "## Files");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Status | Count |");
    let _ = writeln!(out, "|---|---|");
    let counts = db.count_files_by_status()?;
    let mut total = 0u64;
    for (status, count) in &counts {
        total += count;
        let _ = writeln!(out, "| {status} | {count} |");
    }
    let _ = writeln!(out, "| **total** | **{total}** |");
    let _ = writeln!(out);

    let _ = writeln!(out, "## Clusters");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Clusters: {}", db.count_clusters()?);
    let _ = writeln!(out, "- With duplicates: {}", db.count_duplicate_clusters()?);
    let _ = writeln!(out);

    let plan_counts = db.count_plans_by_action()?;
    if !plan_counts.is_empty() {
        let _ = writeln!(out, "## Plan");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Action | Count |");
        let _ = writeln!(out, "|---|---|");
        for (action, count) in &plan_counts {
            let _ = writeln!(out, "| {action} | {count} |");
        }
        let _ = writeln!(out);
    }

    let executions = db.executions()?;
    if !executions.is_empty() {
        let ok = executions.iter().filter(|e| e.ok).count();
        let failed = executions.len() - ok;
        let bytes: u64 = executions.iter().map(|e| e.bytes_written).sum();
        let _ = writeln!(out, "## Execution");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Succeeded: {ok}");
        let _ = writeln!(out, "- Failed: {failed}");
        let _ = writeln!(out, "- Bytes written: {bytes}");
        let _ = writeln!(out);
    }

    let error_files = db.files_with_status(&[FileStatus::Error])?;
    if !error_files.is_empty() {
        let _ = writeln!(out, "## Extraction errors (top {})", error_files.len().min(20));
        let _ = writeln!(out);
        for file in error_files.iter().take(20) {
            let _ = writeln!(
                out,
                "- `{}`: {}",
                file.src_path.display(),
                file.error.as_deref().unwrap_or("unknown")
            );
        }
        let _ = writeln!(out);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlc_core::db::Database;
    use mlc_core::events::EventLog;
    use mlc_core::model::FileRow;
    use std::sync::Arc;

    #[test]
    fn render_includes_counts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_file_batch(&[FileRow::discovered(
            "k".into(),
            "/in/a.flac".into(),
            10,
            0,
        )])
        .unwrap();
        let ctx = RunContext::new(Config::default(), db, Arc::new(EventLog::null()));

        let markdown = render(&ctx).unwrap();
        assert!(markdown.contains("# Library cleaning summary"));
        assert!(markdown.contains("| discovered | 1 |"));
        assert!(markdown.contains("Clusters: 0"));
    }
}
