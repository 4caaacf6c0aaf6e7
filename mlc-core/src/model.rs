//! Persistent entities of the cleaning pipeline
//!
//! Every struct here maps 1:1 onto a state-store table. Components hold
//! these rows transiently; the store owns them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Lifecycle of a discovered file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Found by the scanner, not yet probed
    Discovered,
    /// Metadata extracted and stored
    MetaOk,
    /// Extraction failed; `FileRow::error` holds the reason
    Error,
    /// Materialized at the destination
    Executed,
    /// Planned away (duplicate loser or conflict)
    Skipped,
}

impl FileStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::MetaOk => "meta_ok",
            Self::Error => "error",
            Self::Executed => "executed",
            Self::Skipped => "skipped",
        }
    }
}

impl FromStr for FileStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "meta_ok" => Ok(Self::MetaOk),
            "error" => Ok(Self::Error),
            "executed" => Ok(Self::Executed),
            "skipped" => Ok(Self::Skipped),
            other => Err(AppError::Other(format!("unknown file status '{other}'"))),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered file
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    /// Sequential store identifier (0 before insert)
    pub id: i64,
    /// Stable content-index key, unique across the store
    pub file_key: String,
    /// Absolute source path
    pub src_path: PathBuf,
    /// Size at discovery time
    pub size_bytes: u64,
    /// Modification time at discovery, unix seconds
    pub mtime_unix: i64,
    /// Lifecycle status
    pub status: FileStatus,
    /// Extraction error, when `status == Error`
    pub error: Option<String>,
}

impl FileRow {
    /// Row for a freshly discovered file
    #[must_use]
    pub fn discovered(file_key: String, src_path: PathBuf, size_bytes: u64, mtime_unix: i64) -> Self {
        Self {
            id: 0,
            file_key,
            src_path,
            size_bytes,
            mtime_unix,
            status: FileStatus::Discovered,
            error: None,
        }
    }
}

/// A raw tag value preserved for the `raw_tags_json` column
///
/// Known value shapes are kept typed; anything else survives as bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Text frame
    Text(String),
    /// Integer frame
    Int(i64),
    /// Boolean flag frame
    Flag(bool),
    /// Opaque payload
    Blob(Vec<u8>),
}

impl TagValue {
    /// Text content, if this is a text value
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness for compilation-style flag tags ("1", "true", 1, true)
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Text(s) => matches!(s.trim(), "1" | "true" | "TRUE" | "True"),
            Self::Blob(_) => false,
        }
    }
}

/// Merged metadata for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    /// Container format (mp3, flac, mp4, ogg, ...)
    pub container: Option<String>,
    /// Codec name
    pub codec: Option<String>,
    /// Average bitrate in kbit/s
    pub bitrate_kbps: Option<u32>,
    /// Sample rate in Hz
    pub sample_rate_hz: Option<u32>,
    /// Bits per sample, when the codec reports it
    pub bit_depth: Option<u32>,
    /// Channel count
    pub channels: Option<u32>,
    /// Whether the codec is lossless
    pub lossless: bool,
    /// Duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Track artist
    pub artist: Option<String>,
    /// Album title
    pub album: Option<String>,
    /// Album artist
    pub album_artist: Option<String>,
    /// Track title
    pub title: Option<String>,
    /// Track number
    pub track_no: Option<u32>,
    /// Tracks on the disc
    pub track_total: Option<u32>,
    /// Disc number
    pub disc_no: Option<u32>,
    /// Discs in the release
    pub disc_total: Option<u32>,
    /// Release date as tagged (free-form, usually YYYY or YYYY-MM-DD)
    pub date: Option<String>,
    /// Compilation flag (TCMP / cpil / COMPILATION)
    pub compilation: bool,
    /// Short format label for reporting (upper-case extension)
    pub format: Option<String>,
    /// Every raw tag the probes surfaced
    pub raw_tags: BTreeMap<String, TagValue>,
}

impl TrackMetadata {
    /// Serialize the raw tag map for storage
    #[must_use]
    pub fn raw_tags_json(&self) -> String {
        serde_json::to_string(&self.raw_tags).unwrap_or_else(|_| "{}".to_string())
    }

    /// Count of the four core tags present (artist, album, title, track)
    #[must_use]
    pub fn core_tag_count(&self) -> u32 {
        let mut n = 0;
        if self.artist.as_deref().is_some_and(|s| !s.is_empty()) {
            n += 1;
        }
        if self.album.as_deref().is_some_and(|s| !s.is_empty()) {
            n += 1;
        }
        if self.title.as_deref().is_some_and(|s| !s.is_empty()) {
            n += 1;
        }
        if self.track_no.is_some_and(|t| t > 0) {
            n += 1;
        }
        n
    }
}

/// One recording identity shared by duplicate files
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRow {
    /// Canonical key `artist|title|version|bucket|discN|trackN`
    pub cluster_key: String,
    /// Human-readable hint (pre-normalization artist - title)
    pub hint: String,
}

/// Membership of a file in a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMemberRow {
    /// Owning cluster
    pub cluster_key: String,
    /// Member file
    pub file_id: i64,
    /// Quality score assigned by the scorer
    pub quality_score: f64,
    /// Winner flag; at most one per cluster
    pub preferred: bool,
}

/// Planned action for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    /// Copy to destination
    Copy,
    /// Move to destination
    Move,
    /// Hard link at destination
    Hardlink,
    /// Symlink at destination
    Symlink,
    /// Do nothing (loser, conflict, or policy)
    Skip,
}

impl PlanAction {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Hardlink => "hardlink",
            Self::Symlink => "symlink",
            Self::Skip => "skip",
        }
    }
}

impl FromStr for PlanAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "hardlink" => Ok(Self::Hardlink),
            "symlink" => Ok(Self::Symlink),
            "skip" => Ok(Self::Skip),
            other => Err(AppError::Other(format!("unknown plan action '{other}'"))),
        }
    }
}

impl From<crate::config::TransferMode> for PlanAction {
    fn from(mode: crate::config::TransferMode) -> Self {
        use crate::config::TransferMode;
        match mode {
            TransferMode::Copy => Self::Copy,
            TransferMode::Move => Self::Move,
            TransferMode::Hardlink => Self::Hardlink,
            TransferMode::Symlink => Self::Symlink,
        }
    }
}

/// One planned operation
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRow {
    /// Subject file
    pub file_id: i64,
    /// Destination path; empty for skips
    pub dest_path: PathBuf,
    /// What to do
    pub action: PlanAction,
    /// Human reason (skips and conflicts)
    pub reason: String,
}

/// Outcome of one executor attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRow {
    /// Subject file
    pub file_id: i64,
    /// Whether the operation completed and verified
    pub ok: bool,
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// Verification hash, when hash verify ran
    pub verify_hash: Option<String>,
    /// Failure description
    pub error: Option<String>,
    /// Wall time of the attempt
    pub duration_ms: u64,
}

/// Singleton checkpoint of an interrupted clustering run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteringProgress {
    /// Highest file id already folded into the cluster map
    pub last_processed_file_id: i64,
    /// Files processed so far
    pub files_processed: u64,
    /// Total files the run saw at start
    pub total_files: u64,
    /// Clusters accumulated so far
    pub clusters_so_far: u64,
}

/// Cached result of an external artist canonicalization
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtist {
    /// Normalized lookup key
    pub search_key: String,
    /// Canonical display name
    pub canonical_name: String,
    /// Known aliases
    pub aliases: Vec<String>,
    /// Match score the service reported
    pub score: u32,
    /// Unix seconds when cached
    pub cached_at: i64,
    /// Lookup count since caching
    pub hit_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_status_round_trips() {
        for status in [
            FileStatus::Discovered,
            FileStatus::MetaOk,
            FileStatus::Error,
            FileStatus::Executed,
            FileStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
    }

    #[test]
    fn tag_value_truthiness() {
        assert!(TagValue::Text("1".into()).is_truthy());
        assert!(TagValue::Int(1).is_truthy());
        assert!(TagValue::Flag(true).is_truthy());
        assert!(!TagValue::Text("0".into()).is_truthy());
        assert!(!TagValue::Blob(vec![1]).is_truthy());
    }

    #[test]
    fn core_tag_count_requires_positive_track() {
        let mut meta = TrackMetadata {
            artist: Some("ABBA".into()),
            album: Some("Arrival".into()),
            title: Some("SOS".into()),
            track_no: Some(0),
            ..Default::default()
        };
        assert_eq!(meta.core_tag_count(), 3);
        meta.track_no = Some(4);
        assert_eq!(meta.core_tag_count(), 4);
    }

    #[test]
    fn raw_tags_serialize_stably() {
        let mut meta = TrackMetadata::default();
        meta.raw_tags.insert("TCMP".into(), TagValue::Text("1".into()));
        meta.raw_tags.insert("TRCK".into(), TagValue::Int(7));
        let json = meta.raw_tags_json();
        assert!(json.contains("TCMP"));
        let parsed: std::collections::BTreeMap<String, TagValue> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
