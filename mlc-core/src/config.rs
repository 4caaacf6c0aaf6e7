//! Run configuration for the library cleaner
//!
//! A single typed record with every recognized option. Precedence between
//! CLI flags, environment variables and the config file is resolved by the
//! binary before a `Config` reaches the core; the core only validates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// How winner files are materialized at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Copy the file, leaving the source in place
    #[default]
    Copy,
    /// Move the file (rename on the same filesystem, copy+delete across)
    Move,
    /// Hard link the file (falls back to copy across filesystems)
    Hardlink,
    /// Symlink the destination to the source
    Symlink,
}

impl FromStr for TransferMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "hardlink" => Ok(Self::Hardlink),
            "symlink" => Ok(Self::Symlink),
            other => Err(AppError::InvalidConfig(format!("unknown mode '{other}'"))),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Hardlink => "hardlink",
            Self::Symlink => "symlink",
        };
        f.write_str(s)
    }
}

/// Post-write verification strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Destination size equals source size
    #[default]
    Size,
    /// Content hash of destination matches the source
    Hash,
    /// Byte-by-byte comparison
    Full,
}

impl FromStr for VerifyMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "size" => Ok(Self::Size),
            "hash" => Ok(Self::Hash),
            "full" => Ok(Self::Full),
            other => Err(AppError::InvalidConfig(format!("unknown verify mode '{other}'"))),
        }
    }
}

/// Hash algorithm used for `VerifyMode::Hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    /// Fast non-cryptographic hash
    #[default]
    Xxh3,
    /// Portable cryptographic hash
    Sha1,
    /// Hashing disabled; `VerifyMode::Hash` degrades to size checking
    None,
}

impl FromStr for HashAlgo {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xxh3" => Ok(Self::Xxh3),
            "sha1" => Ok(Self::Sha1),
            "none" => Ok(Self::None),
            other => Err(AppError::InvalidConfig(format!("unknown hash algo '{other}'"))),
        }
    }
}

/// What happens to losing cluster members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Leave duplicates where they are
    #[default]
    Keep,
    /// Reserved: move duplicates into a quarantine directory
    Quarantine,
    /// Reserved: delete duplicates after the winner verifies
    Delete,
}

impl FromStr for DuplicatePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "quarantine" => Ok(Self::Quarantine),
            "delete" => Ok(Self::Delete),
            other => Err(AppError::InvalidConfig(format!(
                "unknown duplicate policy '{other}'"
            ))),
        }
    }
}

/// Default destination layout template
pub const DEFAULT_LAYOUT: &str = "{album_artist}/{date - }{album}/{disc/}{track - }{title}.{ext}";

/// Default state database path
pub const DEFAULT_DB_PATH: &str = ".mlc/mlc-state.db";

/// Full run configuration
///
/// Every recognized option, with serde defaults so a partial config file
/// deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source directory to scan
    pub source: PathBuf,
    /// Destination root for planned files
    pub destination: PathBuf,
    /// State database path
    pub db: PathBuf,
    /// Worker pool width (0 = auto)
    pub concurrency: usize,
    /// Transfer mode for winners
    pub mode: TransferMode,
    /// Post-write verification
    pub verify: VerifyMode,
    /// Hash algorithm for hash verification
    pub hashing: HashAlgo,
    /// Destination layout template
    pub layout: String,
    /// NAS tuning override: `Some(true)` forces it, `Some(false)` disables
    /// it, `None` lets filesystem detection decide
    pub nas_mode: Option<bool>,
    /// Policy for losing cluster members
    pub duplicate_policy: DuplicatePolicy,
    /// Prefer an already-executed file over re-materializing
    pub prefer_existing: bool,
    /// Enable the MusicBrainz artist canonicalizer
    pub musicbrainz: bool,
    /// Warm the artist cache before clustering
    pub musicbrainz_preload: bool,
    /// Write healed tags back to files (reserved; tags are never written yet)
    pub write_tags: bool,
    /// Disable filename/path enrichment and title cleaning
    pub no_auto_healing: bool,
    /// Verbose logging
    pub verbose: bool,
    /// Quiet logging
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: PathBuf::new(),
            db: PathBuf::from(DEFAULT_DB_PATH),
            concurrency: 0,
            mode: TransferMode::default(),
            verify: VerifyMode::default(),
            hashing: HashAlgo::default(),
            layout: DEFAULT_LAYOUT.to_string(),
            nas_mode: None,
            duplicate_policy: DuplicatePolicy::default(),
            prefer_existing: false,
            musicbrainz: false,
            musicbrainz_preload: false,
            write_tags: false,
            no_auto_healing: false,
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Effective worker pool width
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            num_cpus::get().min(8)
        }
    }

    /// Validate the fields a scan run needs
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the source directory is missing or not a
    /// directory.
    pub fn validate_source(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(AppError::InvalidConfig("source directory is required".into()));
        }
        if !self.source.is_dir() {
            return Err(AppError::InvalidConfig(format!(
                "source '{}' is not a directory",
                self.source.display()
            )));
        }
        Ok(())
    }

    /// Validate the fields a plan/execute run needs
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the destination is unset or the layout
    /// template renders no filename.
    pub fn validate_destination(&self) -> Result<()> {
        if self.destination.as_os_str().is_empty() {
            return Err(AppError::InvalidConfig(
                "destination directory is required".into(),
            ));
        }
        if self.layout.trim().is_empty() {
            return Err(AppError::InvalidConfig("layout template is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_from_str() {
        for s in ["copy", "move", "hardlink", "symlink"] {
            let mode: TransferMode = s.parse().unwrap();
            assert_eq!(mode.to_string(), s);
        }
        assert!("teleport".parse::<TransferMode>().is_err());
    }

    #[test]
    fn verify_and_hash_parse() {
        assert_eq!("full".parse::<VerifyMode>().unwrap(), VerifyMode::Full);
        assert_eq!("sha1".parse::<HashAlgo>().unwrap(), HashAlgo::Sha1);
        assert!("md5".parse::<HashAlgo>().is_err());
    }

    #[test]
    fn default_config_has_default_layout() {
        let config = Config::default();
        assert_eq!(config.layout, DEFAULT_LAYOUT);
        assert_eq!(config.db, PathBuf::from(DEFAULT_DB_PATH));
        assert!(config.nas_mode.is_none());
    }

    #[test]
    fn validate_rejects_missing_source() {
        let config = Config::default();
        assert!(config.validate_source().is_err());
    }

    #[test]
    fn partial_toml_deserializes_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            source = "/music/in"
            destination = "/music/out"
            mode = "move"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, TransferMode::Move);
        assert_eq!(config.verify, VerifyMode::Size);
        assert_eq!(config.layout, DEFAULT_LAYOUT);
    }
}
