//! Stage 5: execution
//!
//! Materializes non-skip plans at their destinations. Each file is staged to
//! a `.part` sibling, fsynced, verified against the source, and atomically
//! renamed into place; in move mode the source is unlinked only after the
//! verify passes. Same-filesystem moves take the rename fast path. Every
//! I/O step is wrapped in transient-error retry, and a full destination
//! aborts the remaining run.

pub mod hash;
pub mod retry;

use crossbeam_channel::{bounded, Receiver};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::VerifyMode;
use crate::error::{AppError, Result};
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::fsprobe::{self, TransferTuning};
use crate::model::{ExecutionRow, FileRow, FileStatus, PlanAction, PlanRow};
use crate::run::{ErrorTally, RunContext};

use retry::{retry_with_backoff, RetryPolicy};

/// Staging suffix; promoted by rename after verification
const PART_SUFFIX: &str = ".part";

/// Result of an execution stage
#[derive(Debug, Clone, Default)]
pub struct ExecuteSummary {
    /// Files materialized and verified
    pub executed: u64,
    /// Files that failed
    pub failed: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Whether the run aborted early (disk full, cancellation)
    pub aborted: bool,
    /// Failure tally
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

/// Plan materializer
pub struct Executor {
    ctx: RunContext,
    tuning: TransferTuning,
    retry_policy: RetryPolicy,
}

impl Executor {
    /// Build the executor, deriving tuning from the filesystem environment
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        let tuning = fsprobe::auto_tune(
            &ctx.config.source,
            &ctx.config.destination,
            ctx.config.nas_mode,
            ctx.config.effective_concurrency(),
        );
        let retry_policy = if tuning.nas_profile {
            RetryPolicy::nas()
        } else {
            RetryPolicy::default()
        };
        Self {
            ctx,
            tuning,
            retry_policy,
        }
    }

    /// Override tuning (tests)
    #[must_use]
    pub fn with_tuning(mut self, tuning: TransferTuning, retry_policy: RetryPolicy) -> Self {
        self.tuning = tuning;
        self.retry_policy = retry_policy;
        self
    }

    /// Execute every pending plan
    ///
    /// # Errors
    /// Returns store errors from the pending-plan selection; per-file
    /// failures are recorded as failed executions, not propagated.
    pub fn run(&self) -> Result<ExecuteSummary> {
        let start = Instant::now();
        let pending = self.ctx.db.pending_executions()?;
        if pending.is_empty() {
            log::info!("Execution: nothing to do");
            return Ok(ExecuteSummary {
                duration: start.elapsed(),
                ..Default::default()
            });
        }
        log::info!(
            "Executing {} plans with {} workers",
            pending.len(),
            self.tuning.concurrency
        );

        let workers = self.tuning.concurrency.max(1);
        let (work_tx, work_rx) = bounded::<(PlanRow, FileRow)>(workers * 2);
        let disk_full = Arc::new(AtomicBool::new(false));

        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let ctx = self.ctx.clone();
            let work_rx = work_rx.clone();
            let tuning = self.tuning;
            let retry_policy = self.retry_policy;
            let disk_full = Arc::clone(&disk_full);
            worker_handles.push(thread::spawn(move || {
                execute_worker(&ctx, tuning, retry_policy, &work_rx, &disk_full)
            }));
        }
        drop(work_rx);

        for item in pending {
            if self.ctx.cancel.is_cancelled() || disk_full.load(Ordering::SeqCst) {
                break;
            }
            if work_tx.send(item).is_err() {
                break;
            }
        }
        drop(work_tx);

        let mut summary = ExecuteSummary::default();
        for handle in worker_handles {
            if let Ok(worker) = handle.join() {
                summary.executed += worker.executed;
                summary.failed += worker.failed;
                summary.bytes_written += worker.bytes_written;
                summary.errors.merge(&worker.errors);
            }
        }
        summary.aborted = self.ctx.cancel.is_cancelled() || disk_full.load(Ordering::SeqCst);
        summary.duration = start.elapsed();
        log::info!(
            "Execution complete: {} ok, {} failed, {} bytes in {:.1?}",
            summary.executed,
            summary.failed,
            summary.bytes_written,
            summary.duration
        );
        Ok(summary)
    }
}

#[derive(Default)]
struct WorkerTally {
    executed: u64,
    failed: u64,
    bytes_written: u64,
    errors: ErrorTally,
}

fn execute_worker(
    ctx: &RunContext,
    tuning: TransferTuning,
    retry_policy: RetryPolicy,
    work_rx: &Receiver<(PlanRow, FileRow)>,
    disk_full: &AtomicBool,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    while let Ok((plan, file)) = work_rx.recv() {
        if ctx.cancel.is_cancelled() || disk_full.load(Ordering::SeqCst) {
            break;
        }
        let attempt_start = Instant::now();
        let outcome = execute_one(ctx, tuning, retry_policy, &plan, &file);
        let duration_ms = attempt_start.elapsed().as_millis() as u64;

        match outcome {
            Ok(done) => {
                tally.executed += 1;
                tally.bytes_written += done.bytes_written;
                let execution = ExecutionRow {
                    file_id: file.id,
                    ok: true,
                    bytes_written: done.bytes_written,
                    verify_hash: done.verify_hash.clone(),
                    error: None,
                    duration_ms,
                };
                if let Err(e) = ctx.db.upsert_execution(&execution) {
                    tally.errors.push(e.to_string());
                }
                if let Err(e) =
                    ctx.db
                        .update_file_status_batch(&[(file.id, FileStatus::Executed, None)])
                {
                    tally.errors.push(e.to_string());
                }
                let mut record = EventRecord::new(EventLevel::Info, EventKind::Execute)
                    .file_key(file.file_key.clone())
                    .src_path(&file.src_path);
                record.action = Some(plan.action.as_str().to_string());
                record.bytes_written = Some(done.bytes_written);
                record.duration_ms = Some(duration_ms);
                ctx.events.record(record);
            }
            Err(err) => {
                tally.failed += 1;
                tally
                    .errors
                    .push(format!("{}: {err}", file.src_path.display()));
                ctx.events.record_error(&file.src_path, &err);
                let execution = ExecutionRow {
                    file_id: file.id,
                    ok: false,
                    bytes_written: 0,
                    verify_hash: None,
                    error: Some(err.to_string()),
                    duration_ms,
                };
                if let Err(e) = ctx.db.upsert_execution(&execution) {
                    tally.errors.push(e.to_string());
                }
                if matches!(err, AppError::DiskFull(_)) {
                    log::error!("Destination full; aborting execution run");
                    disk_full.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
    tally
}

struct Done {
    bytes_written: u64,
    verify_hash: Option<String>,
}

fn execute_one(
    ctx: &RunContext,
    tuning: TransferTuning,
    retry_policy: RetryPolicy,
    plan: &PlanRow,
    file: &FileRow,
) -> Result<Done> {
    let src = &file.src_path;
    let dest = &plan.dest_path;
    let Some(parent) = dest.parent() else {
        return Err(AppError::InvalidConfig(format!(
            "destination '{}' has no parent directory",
            dest.display()
        )));
    };
    retry_with_backoff(retry_policy, "mkdir", || {
        fs::create_dir_all(parent).map_err(AppError::from)
    })?;

    // Same-filesystem move: plain rename, no staging, no verify needed.
    if plan.action == PlanAction::Move && fsprobe::is_same_filesystem(src, dest) {
        retry_with_backoff(retry_policy, "rename", || {
            fs::rename(src, dest).map_err(AppError::from)
        })?;
        return Ok(Done {
            bytes_written: 0,
            verify_hash: None,
        });
    }

    if plan.action == PlanAction::Symlink {
        symlink(src, dest)?;
        return Ok(Done {
            bytes_written: 0,
            verify_hash: None,
        });
    }

    let part = part_path(dest);
    let result = stage_verify_promote(ctx, tuning, retry_policy, plan, file, &part);
    if result.is_err() {
        // Never leave staging litter behind a failure.
        let _ = fs::remove_file(&part);
    }
    result
}

fn stage_verify_promote(
    ctx: &RunContext,
    tuning: TransferTuning,
    retry_policy: RetryPolicy,
    plan: &PlanRow,
    file: &FileRow,
    part: &Path,
) -> Result<Done> {
    let src = &file.src_path;
    let dest = &plan.dest_path;

    let bytes_written = match plan.action {
        PlanAction::Hardlink => match fs::hard_link(src, part) {
            Ok(()) => 0,
            Err(e) if is_cross_device(&e) => {
                log::debug!(
                    "hardlink {} -> {} crossed filesystems; copying",
                    src.display(),
                    part.display()
                );
                copy_streaming(src, part, tuning.buffer_bytes, retry_policy)?
            }
            Err(e) => return Err(e.into()),
        },
        _ => copy_streaming(src, part, tuning.buffer_bytes, retry_policy)?,
    };

    let verify_hash = verify(ctx, file, part)?;

    retry_with_backoff(retry_policy, "promote", || {
        fs::rename(part, dest).map_err(AppError::from)
    })?;

    if plan.action == PlanAction::Move {
        retry_with_backoff(retry_policy, "unlink source", || {
            fs::remove_file(src).map_err(AppError::from)
        })?;
    }
    Ok(Done {
        bytes_written,
        verify_hash,
    })
}

fn verify(ctx: &RunContext, file: &FileRow, part: &Path) -> Result<Option<String>> {
    match ctx.config.verify {
        VerifyMode::Size => {
            let written = fs::metadata(part)?.len();
            if written != file.size_bytes {
                return Err(AppError::Corrupt(format!(
                    "size mismatch after write: {} != {}",
                    written, file.size_bytes
                )));
            }
            Ok(None)
        }
        VerifyMode::Hash => {
            let algo = ctx.config.hashing;
            let src_hash = hash::hash_file(&file.src_path, algo)?;
            let dest_hash = hash::hash_file(part, algo)?;
            match (&src_hash, &dest_hash) {
                (Some(a), Some(b)) if a != b => Err(AppError::Corrupt(format!(
                    "hash mismatch after write: {b} != {a}"
                ))),
                (None, None) => {
                    // Hashing disabled: degrade to the size check.
                    let written = fs::metadata(part)?.len();
                    if written != file.size_bytes {
                        return Err(AppError::Corrupt(format!(
                            "size mismatch after write: {} != {}",
                            written, file.size_bytes
                        )));
                    }
                    Ok(None)
                }
                _ => Ok(dest_hash),
            }
        }
        VerifyMode::Full => {
            if !hash::files_identical(&file.src_path, part)? {
                return Err(AppError::Corrupt(
                    "content mismatch after write".to_string(),
                ));
            }
            Ok(None)
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

fn is_cross_device(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        err.to_string().to_lowercase().contains("cross-device")
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(AppError::from)
}

#[cfg(windows)]
fn symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(src, dest).map_err(AppError::from)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_src: &Path, _dest: &Path) -> Result<()> {
    Err(AppError::Unsupported("symlinks unavailable".to_string()))
}

/// Stream `src` into `dest`, fsync, and fsync the parent directory
fn copy_streaming(
    src: &Path,
    dest: &Path,
    buffer_bytes: usize,
    retry_policy: RetryPolicy,
) -> Result<u64> {
    retry_with_backoff(retry_policy, "copy", || {
        let mut reader = File::open(src)?;
        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)?;
        let mut buf = vec![0u8; buffer_bytes.max(4096)];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            written += n as u64;
        }
        writer.flush()?;
        writer.sync_all()?;
        drop(writer);
        if let Some(parent) = dest.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, HashAlgo, TransferMode};
    use crate::db::test_support::seed_file;
    use crate::db::Database;
    use crate::events::EventLog;
    use tempfile::tempdir;

    fn write_src(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn ctx_for(src_root: &Path, dest_root: &Path, mode: TransferMode, verify: VerifyMode) -> RunContext {
        let config = Config {
            source: src_root.to_path_buf(),
            destination: dest_root.to_path_buf(),
            mode,
            verify,
            hashing: HashAlgo::Xxh3,
            concurrency: 1,
            ..Default::default()
        };
        RunContext::new(config, Database::open_in_memory().unwrap(), Arc::new(EventLog::null()))
    }

    fn plan_for(ctx: &RunContext, key: &str, src: &Path, dest: &Path, action: PlanAction) -> FileRow {
        let size = fs::metadata(src).map(|m| m.len()).unwrap_or(0);
        let file = seed_file(&ctx.db, key, src.to_str().unwrap(), size, 0);
        ctx.db
            .upsert_plan_batch(&[PlanRow {
                file_id: file.id,
                dest_path: dest.to_path_buf(),
                action,
                reason: String::new(),
            }])
            .unwrap();
        file
    }

    #[test]
    fn copy_verifies_and_promotes() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"flac bytes here");
        let dest = dir.path().join("out/ABBA/SOS.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Copy, VerifyMode::Size);
        let file = plan_for(&ctx, "a", &src, &dest, PlanAction::Copy);

        let summary = Executor::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.failed, 0);

        assert!(dest.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"flac bytes here");
        assert!(src.exists(), "copy must keep the source");
        assert!(!part_path(&dest).exists());

        let execution = ctx.db.get_execution(file.id).unwrap().unwrap();
        assert!(execution.ok);
        assert_eq!(execution.bytes_written, 15);
        assert_eq!(
            ctx.db.get_file(file.id).unwrap().unwrap().status,
            FileStatus::Executed
        );
    }

    #[test]
    fn hash_verify_records_hash() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"hash me");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Copy, VerifyMode::Hash);
        let file = plan_for(&ctx, "a", &src, &dest, PlanAction::Copy);

        Executor::new(ctx.clone()).run().unwrap();
        let execution = ctx.db.get_execution(file.id).unwrap().unwrap();
        assert!(execution.ok);
        assert_eq!(
            execution.verify_hash,
            hash::hash_file(&src, HashAlgo::Xxh3).unwrap()
        );
    }

    #[test]
    fn move_on_same_filesystem_renames() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"move me");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Move, VerifyMode::Size);
        plan_for(&ctx, "a", &src, &dest, PlanAction::Move);

        let summary = Executor::new(ctx).run().unwrap();
        assert_eq!(summary.executed, 1);
        assert!(dest.exists());
        assert!(!src.exists(), "move must remove the source");
    }

    #[test]
    fn verify_failure_cleans_up_and_keeps_source() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"actual content");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Copy, VerifyMode::Size);

        // Recorded size disagrees with the bytes on disk, so the
        // post-write verify must fail.
        let file = seed_file(&ctx.db, "a", src.to_str().unwrap(), 999, 0);
        ctx.db
            .upsert_plan_batch(&[PlanRow {
                file_id: file.id,
                dest_path: dest.clone(),
                action: PlanAction::Copy,
                reason: String::new(),
            }])
            .unwrap();

        let summary = Executor::new(ctx.clone()).run().unwrap();
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.failed, 1);

        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        assert!(src.exists());

        let execution = ctx.db.get_execution(file.id).unwrap().unwrap();
        assert!(!execution.ok);
        assert!(execution.error.unwrap().contains("size mismatch"));
        // File status untouched by a failed execution.
        assert_eq!(
            ctx.db.get_file(file.id).unwrap().unwrap().status,
            FileStatus::Discovered
        );
    }

    #[cfg(unix)]
    #[test]
    fn hardlink_links_content() {
        use std::os::unix::fs::MetadataExt;
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"link me");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Hardlink, VerifyMode::Size);
        plan_for(&ctx, "a", &src, &dest, PlanAction::Hardlink);

        let summary = Executor::new(ctx).run().unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(
            fs::metadata(&src).unwrap().ino(),
            fs::metadata(&dest).unwrap().ino()
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_points_at_source() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"sym me");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Symlink, VerifyMode::Size);
        plan_for(&ctx, "a", &src, &dest, PlanAction::Symlink);

        let summary = Executor::new(ctx).run().unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(fs::read_link(&dest).unwrap(), src);
    }

    #[test]
    fn successful_execution_is_not_repeated() {
        let dir = tempdir().unwrap();
        let src = write_src(dir.path(), "in/a.flac", b"once");
        let dest = dir.path().join("out/a.flac");
        let ctx = ctx_for(&dir.path().join("in"), &dir.path().join("out"), TransferMode::Copy, VerifyMode::Size);
        plan_for(&ctx, "a", &src, &dest, PlanAction::Copy);

        let executor = Executor::new(ctx.clone());
        assert_eq!(executor.run().unwrap().executed, 1);
        assert_eq!(executor.run().unwrap().executed, 0);
    }
}
