//! Stage 2: metadata extraction
//!
//! A worker pool drains the discovered files, runs both probes against each,
//! merges the results (audio properties authoritative, tag probe overlays
//! empty tag fields), heals missing tags from filename and path context, and
//! hands the merged rows to a metadata batch writer. Failures flow through a
//! second writer that flips the file to `error` with the combined message.

pub mod heal;
pub mod probes;

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::events::{EventKind, EventLevel, EventRecord};
use crate::execute::retry::{retry_with_backoff, RetryPolicy};
use crate::model::{FileRow, FileStatus, TrackMetadata};
use crate::run::{ErrorTally, RunContext};

pub use probes::{AudioProbe, SymphoniaProbe, TagProbe, TagReader};

const BATCH_SIZE: usize = 1000;
const BATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Which files an extraction run picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractSelector {
    /// Only freshly discovered files (normal `scan`)
    Discovered,
    /// Everything already extracted plus previous failures (`rescan`)
    Rescan,
}

impl ExtractSelector {
    fn statuses(self) -> &'static [FileStatus] {
        match self {
            Self::Discovered => &[FileStatus::Discovered],
            Self::Rescan => &[FileStatus::Discovered, FileStatus::MetaOk, FileStatus::Error],
        }
    }
}

/// Result of an extraction stage
#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    /// Files with a stored metadata row
    pub extracted: u64,
    /// Files marked `error`
    pub failed: u64,
    /// Fields healed across the run
    pub healed_fields: u64,
    /// Failure tally
    pub errors: ErrorTally,
    /// Wall time of the stage
    pub duration: Duration,
}

enum WorkerOutput {
    Meta(i64, TrackMetadata),
    Failed(i64, String),
}

/// Two-probe metadata extractor
pub struct Extractor {
    ctx: RunContext,
    tag_probe: Arc<dyn TagProbe>,
    audio_probe: Arc<dyn AudioProbe>,
    retry_policy: RetryPolicy,
}

impl Extractor {
    /// Extractor with the default probe backends
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self::with_probes(ctx, Arc::new(TagReader), Arc::new(SymphoniaProbe))
    }

    /// Extractor with explicit probe backends (tests, alternative stacks)
    #[must_use]
    pub fn with_probes(
        ctx: RunContext,
        tag_probe: Arc<dyn TagProbe>,
        audio_probe: Arc<dyn AudioProbe>,
    ) -> Self {
        Self {
            ctx,
            tag_probe,
            audio_probe,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the probe retry policy (NAS profile)
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Run extraction over the selected files
    ///
    /// # Errors
    /// Returns store errors from the row selection; per-file probe failures
    /// are recorded, not propagated.
    pub fn run(&self, selector: ExtractSelector) -> Result<ExtractSummary> {
        let start = Instant::now();
        let files = self.ctx.db.files_with_status(selector.statuses())?;
        if files.is_empty() {
            log::info!("Extraction: nothing to do");
            return Ok(ExtractSummary {
                duration: start.elapsed(),
                ..Default::default()
            });
        }
        log::info!("Extracting metadata from {} files", files.len());

        let workers = self.ctx.config.effective_concurrency();
        let (file_tx, file_rx) = bounded::<FileRow>(workers * 2);
        let (meta_tx, meta_rx) = bounded::<(i64, TrackMetadata)>(BATCH_SIZE);
        let (status_tx, status_rx) = bounded::<(i64, String)>(BATCH_SIZE);

        let meta_writer = {
            let ctx = self.ctx.clone();
            thread::spawn(move || write_metadata_batches(&ctx, &meta_rx))
        };
        let status_writer = {
            let ctx = self.ctx.clone();
            thread::spawn(move || write_status_batches(&ctx, &status_rx))
        };

        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let ctx = self.ctx.clone();
            let tag_probe = Arc::clone(&self.tag_probe);
            let audio_probe = Arc::clone(&self.audio_probe);
            let retry_policy = self.retry_policy;
            let file_rx = file_rx.clone();
            let meta_tx = meta_tx.clone();
            let status_tx = status_tx.clone();
            worker_handles.push(thread::spawn(move || {
                extract_worker(
                    &ctx,
                    tag_probe.as_ref(),
                    audio_probe.as_ref(),
                    retry_policy,
                    &file_rx,
                    &meta_tx,
                    &status_tx,
                )
            }));
        }
        drop(file_rx);
        drop(meta_tx);
        drop(status_tx);

        for file in files {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            if file_tx.send(file).is_err() {
                break;
            }
        }
        drop(file_tx);

        let mut summary = ExtractSummary::default();
        for handle in worker_handles {
            if let Ok(worker) = handle.join() {
                summary.extracted += worker.extracted;
                summary.failed += worker.failed;
                summary.healed_fields += worker.healed_fields;
                summary.errors.merge(&worker.errors);
            }
        }
        for writer in [meta_writer, status_writer] {
            match writer.join() {
                Ok(tally) => summary.errors.merge(&tally),
                Err(_) => summary.errors.push("extract batch writer panicked".to_string()),
            }
        }
        summary.duration = start.elapsed();
        log::info!(
            "Extraction complete: {} ok, {} failed, {} fields healed in {:.1?}",
            summary.extracted,
            summary.failed,
            summary.healed_fields,
            summary.duration
        );
        Ok(summary)
    }
}

#[derive(Default)]
struct WorkerTally {
    extracted: u64,
    failed: u64,
    healed_fields: u64,
    errors: ErrorTally,
}

fn extract_worker(
    ctx: &RunContext,
    tag_probe: &dyn TagProbe,
    audio_probe: &dyn AudioProbe,
    retry_policy: RetryPolicy,
    file_rx: &Receiver<FileRow>,
    meta_tx: &Sender<(i64, TrackMetadata)>,
    status_tx: &Sender<(i64, String)>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    while let Ok(file) = file_rx.recv() {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let output = extract_one(ctx, tag_probe, audio_probe, retry_policy, &file, &mut tally);
        match output {
            WorkerOutput::Meta(id, meta) => {
                tally.extracted += 1;
                ctx.events.record(
                    EventRecord::new(EventLevel::Info, EventKind::Meta)
                        .file_key(file.file_key.clone())
                        .src_path(&file.src_path),
                );
                if meta_tx.send((id, meta)).is_err() {
                    break;
                }
            }
            WorkerOutput::Failed(id, message) => {
                tally.failed += 1;
                tally.errors.push(format!("{}: {message}", file.src_path.display()));
                ctx.events.record_error(&file.src_path, &message);
                if status_tx.send((id, message)).is_err() {
                    break;
                }
            }
        }
    }
    tally
}

fn extract_one(
    ctx: &RunContext,
    tag_probe: &dyn TagProbe,
    audio_probe: &dyn AudioProbe,
    retry_policy: RetryPolicy,
    file: &FileRow,
    tally: &mut WorkerTally,
) -> WorkerOutput {
    let path = &file.src_path;
    let tag_result = retry_with_backoff(retry_policy, "tag probe", || tag_probe.read(path));
    let audio_result = retry_with_backoff(retry_policy, "audio probe", || audio_probe.read(path));

    let mut meta = match merge_probes(tag_result, audio_result) {
        Ok(meta) => meta,
        Err(message) => return WorkerOutput::Failed(file.id, message),
    };

    if !ctx.config.no_auto_healing {
        let changes = heal::heal(&mut meta, path);
        tally.healed_fields += changes.len() as u64;
        for (field, old, new) in changes {
            let mut record = EventRecord::new(EventLevel::Info, EventKind::AutoHeal)
                .file_key(file.file_key.clone())
                .src_path(path);
            record.healed = Some(format!("{field}={old}=>{new}"));
            ctx.events.record(record);
        }
    }
    if meta.format.is_none() {
        meta.format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_uppercase);
    }
    WorkerOutput::Meta(file.id, meta)
}

/// Merge the two probe results per the extractor's policy
///
/// Audio properties are authoritative; the tag probe overlays tag fields the
/// audio probe left empty or that it reports non-empty. Both probes failing
/// yields the combined error.
fn merge_probes(
    tag_result: Result<TrackMetadata>,
    audio_result: Result<TrackMetadata>,
) -> std::result::Result<TrackMetadata, String> {
    match (tag_result, audio_result) {
        (Ok(tags), Ok(mut meta)) => {
            overlay_tags(&mut meta, tags);
            Ok(meta)
        }
        (Ok(tags), Err(audio_err)) => {
            log::debug!("audio probe failed, using tag probe alone: {audio_err}");
            Ok(tags)
        }
        (Err(tag_err), Ok(meta)) => {
            log::debug!("tag probe failed, using audio probe alone: {tag_err}");
            Ok(meta)
        }
        (Err(tag_err), Err(audio_err)) => {
            Err(format!("tag probe: {tag_err}; audio probe: {audio_err}"))
        }
    }
}

fn overlay_tags(meta: &mut TrackMetadata, tags: TrackMetadata) {
    fn overlay_text(slot: &mut Option<String>, value: Option<String>) {
        if let Some(value) = value {
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
    }
    fn overlay_num(slot: &mut Option<u32>, value: Option<u32>) {
        if value.is_some() {
            *slot = value;
        }
    }
    overlay_text(&mut meta.artist, tags.artist);
    overlay_text(&mut meta.album, tags.album);
    overlay_text(&mut meta.album_artist, tags.album_artist);
    overlay_text(&mut meta.title, tags.title);
    overlay_text(&mut meta.date, tags.date);
    overlay_num(&mut meta.track_no, tags.track_no);
    overlay_num(&mut meta.track_total, tags.track_total);
    overlay_num(&mut meta.disc_no, tags.disc_no);
    overlay_num(&mut meta.disc_total, tags.disc_total);
    meta.compilation = meta.compilation || tags.compilation;
    for (key, value) in tags.raw_tags {
        meta.raw_tags.entry(key).or_insert(value);
    }
}

fn write_metadata_batches(ctx: &RunContext, meta_rx: &Receiver<(i64, TrackMetadata)>) -> ErrorTally {
    let mut errors = ErrorTally::default();
    let mut batch: Vec<(i64, TrackMetadata)> = Vec::with_capacity(BATCH_SIZE);
    let mut deadline = Instant::now() + BATCH_INTERVAL;

    let mut flush = |batch: &mut Vec<(i64, TrackMetadata)>, errors: &mut ErrorTally| {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = ctx.db.insert_metadata_batch(batch) {
            log::error!("Metadata batch insert failed ({} rows): {e}", batch.len());
            errors.push(e.to_string());
        }
        batch.clear();
    };

    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match meta_rx.recv_timeout(timeout) {
            Ok(row) => {
                batch.push(row);
                if batch.len() >= BATCH_SIZE {
                    flush(&mut batch, &mut errors);
                    deadline = Instant::now() + BATCH_INTERVAL;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                flush(&mut batch, &mut errors);
                deadline = Instant::now() + BATCH_INTERVAL;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                flush(&mut batch, &mut errors);
                break;
            }
        }
    }
    errors
}

fn write_status_batches(ctx: &RunContext, status_rx: &Receiver<(i64, String)>) -> ErrorTally {
    let mut errors = ErrorTally::default();
    let mut batch: Vec<(i64, FileStatus, Option<String>)> = Vec::with_capacity(BATCH_SIZE);
    let mut deadline = Instant::now() + BATCH_INTERVAL;

    let mut flush = |batch: &mut Vec<(i64, FileStatus, Option<String>)>, errors: &mut ErrorTally| {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = ctx.db.update_file_status_batch(batch) {
            log::error!("Status batch update failed ({} rows): {e}", batch.len());
            errors.push(e.to_string());
        }
        batch.clear();
    };

    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match status_rx.recv_timeout(timeout) {
            Ok((id, message)) => {
                batch.push((id, FileStatus::Error, Some(message)));
                if batch.len() >= BATCH_SIZE {
                    flush(&mut batch, &mut errors);
                    deadline = Instant::now() + BATCH_INTERVAL;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                flush(&mut batch, &mut errors);
                deadline = Instant::now() + BATCH_INTERVAL;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                flush(&mut batch, &mut errors);
                break;
            }
        }
    }
    errors
}
