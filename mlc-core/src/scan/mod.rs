//! Stage 1: discovery
//!
//! Walks the source tree, filters on the audio extension allow-list, derives
//! a stable identity key per file, and batch-inserts rows for files the
//! store has not seen. Re-running over an unchanged tree inserts nothing.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::fsprobe;
use crate::model::FileRow;
use crate::run::{ErrorTally, RunContext};

/// Extensions the scanner considers audio, lowercase without the dot
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "aiff", "aif", "wma", "ape", "wv", "mpc",
];

/// Rows per batch-writer transaction
const BATCH_SIZE: usize = 1000;
/// Maximum time a partial batch may sit unflushed
const BATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Whether a path carries an allow-listed audio extension
#[must_use]
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Stable identity key for a file
///
/// Hash of `(dev, inode, size, mtime)`, resistant to renames within a
/// volume. When the platform reports no device/inode the key degrades to
/// `(size, mtime)` with a `p-` prefix marking the portable form.
#[must_use]
pub fn file_key(dev: u64, ino: u64, size: u64, mtime_unix: i64) -> String {
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(&dev.to_le_bytes());
    buf[8..16].copy_from_slice(&ino.to_le_bytes());
    buf[16..24].copy_from_slice(&size.to_le_bytes());
    buf[24..].copy_from_slice(&mtime_unix.to_le_bytes());
    if dev == 0 && ino == 0 {
        format!("p-{:016x}", xxh3_64(&buf[16..]))
    } else {
        format!("{:016x}", xxh3_64(&buf))
    }
}

/// Result of a scan stage
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Files newly inserted this run
    pub discovered: u64,
    /// Files skipped because their key was already known
    pub already_known: u64,
    /// Walk or stat failures
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

/// Directory walker + identity keyer
pub struct Scanner {
    ctx: RunContext,
}

impl Scanner {
    /// Build the scanner for a run
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Run discovery over the configured source tree
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a missing source directory and store
    /// errors when the known-key preload fails; per-file failures are
    /// tallied, not propagated.
    pub fn run(&self) -> Result<ScanSummary> {
        self.ctx.config.validate_source()?;
        let start = Instant::now();
        let source = self.ctx.config.source.clone();
        let workers = self.ctx.config.effective_concurrency();

        // Read-through de-dup guard: every key the store already has.
        let known: Arc<RwLock<HashSet<String>>> =
            Arc::new(RwLock::new(self.ctx.db.load_file_keys()?));
        log::info!(
            "Scanning {} ({} keys already known)",
            source.display(),
            known.read().map(|k| k.len()).unwrap_or(0)
        );

        let (path_tx, path_rx) = bounded::<PathBuf>(workers * 2);
        let (row_tx, row_rx) = bounded::<FileRow>(BATCH_SIZE);

        let writer = {
            let ctx = self.ctx.clone();
            thread::spawn(move || write_batches(&ctx, &row_rx))
        };

        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let ctx = self.ctx.clone();
            let known = Arc::clone(&known);
            let path_rx = path_rx.clone();
            let row_tx = row_tx.clone();
            worker_handles.push(thread::spawn(move || {
                scan_worker(&ctx, &known, &path_rx, &row_tx)
            }));
        }
        drop(path_rx);
        drop(row_tx);

        // Walk on the calling thread; workers drain the channel.
        let mut walk_errors = ErrorTally::default();
        for entry in WalkDir::new(&source) {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Walk error under {}: {e}", source.display());
                    walk_errors.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                continue;
            }
            if path_tx.send(entry.into_path()).is_err() {
                break;
            }
        }
        drop(path_tx);

        let mut summary = ScanSummary {
            errors: walk_errors,
            ..Default::default()
        };
        for handle in worker_handles {
            if let Ok(worker) = handle.join() {
                summary.discovered += worker.discovered;
                summary.already_known += worker.already_known;
                summary.errors.merge(&worker.errors);
            }
        }
        match writer.join() {
            Ok(written) => {
                // Writer counts rows actually inserted; workers count rows
                // emitted. The writer is authoritative for `discovered`.
                summary.discovered = written.inserted;
                summary.errors.merge(&written.errors);
            }
            Err(_) => summary.errors.push("scan batch writer panicked".to_string()),
        }
        summary.duration = start.elapsed();

        if self.ctx.cancel.is_cancelled() {
            log::warn!("Scan cancelled after {} new files", summary.discovered);
        } else {
            log::info!(
                "Scan complete: {} new, {} known, {} errors in {:.1?}",
                summary.discovered,
                summary.already_known,
                summary.errors.count,
                summary.duration
            );
        }
        Ok(summary)
    }
}

#[derive(Default)]
struct WorkerTally {
    discovered: u64,
    already_known: u64,
    errors: ErrorTally,
}

fn scan_worker(
    ctx: &RunContext,
    known: &RwLock<HashSet<String>>,
    path_rx: &Receiver<PathBuf>,
    row_tx: &Sender<FileRow>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    while let Ok(path) = path_rx.recv() {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let (dev, ino, size, mtime) = match fsprobe::identity_stat(&path) {
            Ok(stat) => stat,
            Err(e) => {
                log::warn!("stat failed for {}: {e}", path.display());
                ctx.events.record_error(&path, &e);
                tally.errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        let key = file_key(dev, ino, size, mtime);

        if known.read().is_ok_and(|set| set.contains(&key)) {
            tally.already_known += 1;
            continue;
        }
        // Exclusive insert; two symlinked paths with the same (dev, ino)
        // race here and exactly one wins.
        let fresh = known
            .write()
            .map(|mut set| set.insert(key.clone()))
            .unwrap_or(false);
        if !fresh {
            tally.already_known += 1;
            continue;
        }

        ctx.events.record(
            EventRecord::new(EventLevel::Debug, EventKind::Scan)
                .file_key(key.clone())
                .src_path(&path),
        );
        let row = FileRow::discovered(key, path, size, mtime);
        if row_tx.send(row).is_err() {
            break;
        }
        tally.discovered += 1;
    }
    tally
}

struct WriterTally {
    inserted: u64,
    errors: ErrorTally,
}

/// Single batch writer: flush every [`BATCH_SIZE`] rows or
/// [`BATCH_INTERVAL`], whichever first
fn write_batches(ctx: &RunContext, row_rx: &Receiver<FileRow>) -> WriterTally {
    let mut tally = WriterTally {
        inserted: 0,
        errors: ErrorTally::default(),
    };
    let mut batch: Vec<FileRow> = Vec::with_capacity(BATCH_SIZE);
    let mut deadline = Instant::now() + BATCH_INTERVAL;

    let mut flush = |batch: &mut Vec<FileRow>, tally: &mut WriterTally| {
        if batch.is_empty() {
            return;
        }
        match ctx.db.insert_file_batch(batch) {
            Ok(n) => tally.inserted += n,
            Err(e) => {
                // All-or-nothing per batch; later batches still proceed.
                log::error!("File batch insert failed ({} rows): {e}", batch.len());
                tally.errors.push(e.to_string());
            }
        }
        batch.clear();
    };

    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match row_rx.recv_timeout(timeout) {
            Ok(row) => {
                batch.push(row);
                if batch.len() >= BATCH_SIZE {
                    flush(&mut batch, &mut tally);
                    deadline = Instant::now() + BATCH_INTERVAL;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                flush(&mut batch, &mut tally);
                deadline = Instant::now() + BATCH_INTERVAL;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                flush(&mut batch, &mut tally);
                break;
            }
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::events::EventLog;
    use std::fs;
    use tempfile::tempdir;

    fn test_ctx(source: &Path) -> RunContext {
        let config = Config {
            source: source.to_path_buf(),
            concurrency: 2,
            ..Default::default()
        };
        RunContext::new(config, Database::open_in_memory().unwrap(), Arc::new(EventLog::null()))
    }

    fn touch(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel.as_bytes()).unwrap();
        path
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_audio_file(Path::new("/x/a.FLAC")));
        assert!(is_audio_file(Path::new("/x/a.mp3")));
        assert!(!is_audio_file(Path::new("/x/a.txt")));
        assert!(!is_audio_file(Path::new("/x/noext")));
    }

    #[test]
    fn file_key_is_stable_and_distinguishes() {
        assert_eq!(file_key(1, 2, 3, 4), file_key(1, 2, 3, 4));
        assert_ne!(file_key(1, 2, 3, 4), file_key(1, 2, 3, 5));
        assert!(file_key(0, 0, 3, 4).starts_with("p-"));
    }

    #[test]
    fn scan_discovers_audio_files_once() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a/01.mp3");
        touch(dir.path(), "a/02.flac");
        touch(dir.path(), "b/cover.jpg");
        touch(dir.path(), "b/song.OGG");

        let ctx = test_ctx(dir.path());
        let scanner = Scanner::new(ctx.clone());

        let first = scanner.run().unwrap();
        assert_eq!(first.discovered, 3);
        assert_eq!(first.errors.count, 0);

        // Idempotence: a second scan over the unchanged tree is a no-op.
        let second = scanner.run().unwrap();
        assert_eq!(second.discovered, 0);
        assert_eq!(second.already_known, 3);

        let counts = ctx.db.count_files_by_status().unwrap();
        assert_eq!(counts.get("discovered"), Some(&3));
    }

    #[test]
    fn scan_errors_on_missing_source() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let scanner = Scanner::new(test_ctx(&missing));
        assert!(scanner.run().is_err());
    }

    #[test]
    fn cancelled_scan_stops_early() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a/01.mp3");
        let ctx = test_ctx(dir.path());
        ctx.cancel.cancel();
        let summary = Scanner::new(ctx).run().unwrap();
        assert_eq!(summary.discovered, 0);
    }
}
