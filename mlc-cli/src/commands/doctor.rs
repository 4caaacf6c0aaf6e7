//! `mlc doctor`: environment diagnostics
//!
//! Read-only checks of everything a run depends on: directories, the state
//! store, filesystem characteristics, and the derived transfer tuning.

use std::fs;

use mlc_core::config::Config;
use mlc_core::{fsprobe, CancelToken};

use super::build_context;
use crate::error::CliResult;

fn check(label: &str, ok: bool, detail: &str) -> bool {
    let mark = if ok { "ok" } else { "FAIL" };
    println!("[{mark:>4}] {label}: {detail}");
    ok
}

pub fn run(config: &Config) -> CliResult<()> {
    let mut healthy = true;

    // Source and destination directories.
    if config.source.as_os_str().is_empty() {
        check("source", true, "not configured (only needed for scan)");
    } else {
        healthy &= check(
            "source",
            config.source.is_dir(),
            &config.source.display().to_string(),
        );
    }
    if config.destination.as_os_str().is_empty() {
        check("destination", true, "not configured (only needed for plan/execute)");
    } else {
        let exists = config.destination.is_dir();
        let writable = exists
            && fs::write(config.destination.join(".mlc-doctor-probe"), b"probe")
                .map(|()| {
                    let _ = fs::remove_file(config.destination.join(".mlc-doctor-probe"));
                })
                .is_ok();
        healthy &= check(
            "destination",
            exists && writable,
            &format!(
                "{} ({})",
                config.destination.display(),
                if writable { "writable" } else { "missing or read-only" }
            ),
        );
        if exists {
            let case = fsprobe::detect_case_sensitivity(&config.destination);
            check("destination case handling", true, &format!("{case:?}"));
        }
    }

    // Network detection and derived tuning.
    for (label, path) in [("source", &config.source), ("destination", &config.destination), ("state db", &config.db)] {
        if path.as_os_str().is_empty() {
            continue;
        }
        let info = fsprobe::detect_network_filesystem(path);
        check(&format!("{label} filesystem"), true, &info.to_string());
    }
    let tuning = fsprobe::auto_tune(
        &config.source,
        &config.destination,
        config.nas_mode,
        config.effective_concurrency(),
    );
    check(
        "transfer tuning",
        true,
        &format!(
            "{} workers, {} KiB buffer, retries {}",
            tuning.concurrency,
            tuning.buffer_bytes / 1024,
            if tuning.retries_enabled { "on" } else { "off" }
        ),
    );

    // State store.
    match build_context(config.clone(), &CancelToken::new(), false) {
        Ok(ctx) => {
            let version = ctx.db.schema_version().unwrap_or(0);
            healthy &= check(
                "state db",
                version > 0,
                &format!("{} (schema v{version})", config.db.display()),
            );
            let counts = ctx.db.count_files_by_status().unwrap_or_default();
            let total: u64 = counts.values().sum();
            check("library", true, &format!("{total} files known"));
        }
        Err(e) => {
            healthy = check("state db", false, &e.to_string());
        }
    }

    if healthy {
        println!("All checks passed.");
        Ok(())
    } else {
        Err(crate::error::CliError::Usage(
            "doctor found problems; fix the failing checks above".to_string(),
        ))
    }
}
