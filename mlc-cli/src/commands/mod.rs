//! Command implementations

pub mod doctor;
pub mod execute;
pub mod metadata;
pub mod plan;
pub mod report;
pub mod rescan;
pub mod scan;
pub mod show;

use std::path::Path;
use std::sync::Arc;

use mlc_core::config::Config;
use mlc_core::db::{Database, StoreTuning};
use mlc_core::events::{EventLevel, EventLog};
use mlc_core::run::ErrorTally;
use mlc_core::{fsprobe, CancelToken, RunContext};

use crate::error::{CliError, CliResult};

/// Directory holding event logs and reports
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Open the state store with tuning derived from its location
fn open_database(config: &Config) -> CliResult<Database> {
    let network = config.nas_mode.unwrap_or_else(|| {
        fsprobe::detect_network_filesystem(&config.db).is_network
    });
    let tuning = if network {
        StoreTuning::Network
    } else {
        StoreTuning::Local
    };
    Database::open(&config.db, tuning)
        .map_err(|e| CliError::Fatal(format!("cannot open state db '{}': {e}", config.db.display())))
}

fn event_level(config: &Config) -> EventLevel {
    if config.verbose {
        EventLevel::Debug
    } else if config.quiet {
        EventLevel::Warning
    } else {
        EventLevel::Info
    }
}

/// Build a run context for a pipeline command
///
/// Pipeline commands write an event log; read-only commands (`show`,
/// `report`, `metadata`, `doctor`) pass `with_events = false` and get the
/// null log so browsing never creates artifacts.
pub fn build_context(config: Config, cancel: &CancelToken, with_events: bool) -> CliResult<RunContext> {
    let db = open_database(&config)?;
    let events = if with_events {
        let event_log = EventLog::create(Path::new(ARTIFACTS_DIR), event_level(&config))
            .map_err(|e| CliError::Fatal(format!("cannot open event log: {e}")))?;
        if let Some(path) = event_log.path() {
            log::info!("Event log: {}", path.display());
        }
        Arc::new(event_log)
    } else {
        Arc::new(EventLog::null())
    };
    Ok(RunContext::new(config, db, events).with_cancel(cancel.clone()))
}

/// Print a stage's error samples and fold the tally into the exit decision
fn report_errors(stage: &str, tally: &ErrorTally) {
    if tally.count == 0 {
        return;
    }
    eprintln!("{stage}: {} errors", tally.count);
    for sample in &tally.samples {
        eprintln!("  - {sample}");
    }
    if tally.count as usize > tally.samples.len() {
        eprintln!("  (see the event log for the full list)");
    }
}

/// Convert accumulated stage errors into the exit-code contract
fn finish(stage_errors: u64) -> CliResult<()> {
    if stage_errors > 0 {
        Err(CliError::StageErrors(format!(
            "completed with {stage_errors} per-file errors"
        )))
    } else {
        Ok(())
    }
}
