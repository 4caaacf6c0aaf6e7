//! Filesystem environment probing
//!
//! Pure query functions the pipeline uses to pick transfer strategies:
//! same-volume detection for rename fast paths, case-sensitivity probing for
//! destination collision handling, and network-filesystem detection that
//! drives the NAS tuning profile.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Case behavior of a directory's filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSensitivity {
    /// Distinct names differing only in case
    Sensitive,
    /// Names collide regardless of case
    Insensitive,
    /// Probe could not run (permissions, read-only mount)
    Unknown,
}

/// Result of network-filesystem detection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkFsInfo {
    /// Whether the path lives on a network mount
    pub is_network: bool,
    /// Protocol name when known (nfs, smb, cifs, sshfs, afp, webdav)
    pub protocol: Option<String>,
    /// Mount point carrying the path
    pub mount_path: Option<PathBuf>,
}

/// Transfer tuning derived from the filesystem environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTuning {
    /// Worker pool width
    pub concurrency: usize,
    /// Copy buffer size in bytes
    pub buffer_bytes: usize,
    /// Whether transient-error retries are enabled
    pub retries_enabled: bool,
    /// Per-operation timeout in milliseconds
    pub op_timeout_ms: u64,
    /// Whether the NAS profile is active
    pub nas_profile: bool,
}

impl TransferTuning {
    /// Local-disk defaults
    #[must_use]
    pub const fn local(concurrency: usize) -> Self {
        Self {
            concurrency,
            buffer_bytes: 64 * 1024,
            retries_enabled: false,
            op_timeout_ms: 10_000,
            nas_profile: false,
        }
    }

    /// Network profile: fewer workers, bigger buffer, retries on
    #[must_use]
    pub const fn network(concurrency: usize) -> Self {
        let capped = if concurrency > 4 { 4 } else { concurrency };
        Self {
            concurrency: capped,
            buffer_bytes: 256 * 1024,
            retries_enabled: true,
            op_timeout_ms: 30_000,
            nas_profile: true,
        }
    }
}

/// Nearest existing ancestor of a path (the path itself when it exists)
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Whether two paths live on the same filesystem
///
/// Non-existent paths are resolved to their nearest existing ancestor so a
/// not-yet-created destination can still be compared against its volume.
#[must_use]
pub fn is_same_filesystem(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let (Some(a), Some(b)) = (existing_ancestor(a), existing_ancestor(b)) else {
            return false;
        };
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        // No portable device identity; be conservative so the executor
        // streams instead of renaming across volumes.
        let _ = (a, b);
        false
    }
}

/// Probe whether `dir` distinguishes names differing only in case
///
/// Creates two marker files and observes whether the second create collides
/// with the first. Both markers are removed before returning.
#[must_use]
pub fn detect_case_sensitivity(dir: &Path) -> CaseSensitivity {
    let lower = dir.join(".mlc-case-probe");
    let upper = dir.join(".MLC-CASE-PROBE");

    let cleanup = |a: &Path, b: &Path| {
        let _ = fs::remove_file(a);
        let _ = fs::remove_file(b);
    };

    if fs::write(&lower, b"probe").is_err() {
        return CaseSensitivity::Unknown;
    }
    // On an insensitive filesystem the second name resolves to the first
    // file, so its content is overwritten rather than a new entry appearing.
    if fs::write(&upper, b"PROBE").is_err() {
        cleanup(&lower, &upper);
        return CaseSensitivity::Unknown;
    }
    let lower_content = fs::read(&lower).unwrap_or_default();
    cleanup(&lower, &upper);
    if lower_content == b"PROBE" {
        CaseSensitivity::Insensitive
    } else {
        CaseSensitivity::Sensitive
    }
}

#[cfg(target_os = "linux")]
mod magic {
    // Filesystem magic numbers from statfs(2).
    pub const NFS_SUPER_MAGIC: i64 = 0x6969;
    pub const SMB_SUPER_MAGIC: i64 = 0x517B;
    pub const SMB2_MAGIC_NUMBER: i64 = 0xFE53_4D42;
    pub const CIFS_MAGIC_NUMBER: i64 = 0xFF53_4D42;
    pub const FUSE_SUPER_MAGIC: i64 = 0x6546_5350;
}

/// Detect whether `path` sits on a network filesystem
///
/// Linux reads the statfs magic and falls back to a mount-table scan for the
/// protocol and mount point; macOS asks statfs for the filesystem type name;
/// other platforms report local.
#[must_use]
pub fn detect_network_filesystem(path: &Path) -> NetworkFsInfo {
    let Some(existing) = existing_ancestor(path) else {
        return NetworkFsInfo::default();
    };
    detect_network_inner(existing)
}

#[cfg(target_os = "linux")]
fn detect_network_inner(path: &Path) -> NetworkFsInfo {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return NetworkFsInfo::default();
    };
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return NetworkFsInfo::default();
    }

    #[allow(clippy::unnecessary_cast)]
    let f_type = stat.f_type as i64;
    let protocol = match f_type {
        magic::NFS_SUPER_MAGIC => Some("nfs"),
        magic::SMB_SUPER_MAGIC | magic::SMB2_MAGIC_NUMBER => Some("smb"),
        magic::CIFS_MAGIC_NUMBER => Some("cifs"),
        // FUSE covers sshfs and friends; the mount table disambiguates.
        magic::FUSE_SUPER_MAGIC => None,
        _ => return NetworkFsInfo::default(),
    };

    let (mount_protocol, mount_path) = scan_mount_table(path);
    let protocol = protocol
        .map(str::to_string)
        .or(mount_protocol.clone());
    if f_type == magic::FUSE_SUPER_MAGIC && protocol.is_none() {
        // Plain FUSE mount with a non-network backend.
        return NetworkFsInfo::default();
    }
    NetworkFsInfo {
        is_network: true,
        protocol,
        mount_path,
    }
}

#[cfg(target_os = "linux")]
fn scan_mount_table(path: &Path) -> (Option<String>, Option<PathBuf>) {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return (None, None);
    };
    let mut best: Option<(PathBuf, String)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let Some(mount_point) = fields.next() else { continue };
        let Some(fstype) = fields.next() else { continue };
        let mount_point = PathBuf::from(mount_point.replace("\\040", " "));
        if !path.starts_with(&mount_point) {
            continue;
        }
        // Longest matching mount point wins.
        if best
            .as_ref()
            .is_none_or(|(p, _)| mount_point.as_os_str().len() > p.as_os_str().len())
        {
            best = Some((mount_point, fstype.to_string()));
        }
    }
    match best {
        Some((mount_point, fstype)) => {
            let protocol = match fstype.as_str() {
                "nfs" | "nfs4" => Some("nfs".to_string()),
                "cifs" | "smb3" => Some("cifs".to_string()),
                "fuse.sshfs" => Some("sshfs".to_string()),
                "davfs" | "fuse.davfs2" => Some("webdav".to_string()),
                _ => None,
            };
            (protocol, Some(mount_point))
        }
        None => (None, None),
    }
}

#[cfg(target_os = "macos")]
fn detect_network_inner(path: &Path) -> NetworkFsInfo {
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return NetworkFsInfo::default();
    };
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return NetworkFsInfo::default();
    }
    let type_name = unsafe { CStr::from_ptr(stat.f_fstypename.as_ptr()) }
        .to_string_lossy()
        .to_string();
    let protocol = match type_name.as_str() {
        "nfs" => Some("nfs"),
        "smbfs" => Some("smb"),
        "afpfs" => Some("afp"),
        "webdav" => Some("webdav"),
        _ => return NetworkFsInfo::default(),
    };
    let mount_path = unsafe { CStr::from_ptr(stat.f_mntonname.as_ptr()) }
        .to_string_lossy()
        .to_string();
    NetworkFsInfo {
        is_network: true,
        protocol: protocol.map(str::to_string),
        mount_path: Some(PathBuf::from(mount_path)),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn detect_network_inner(_path: &Path) -> NetworkFsInfo {
    NetworkFsInfo::default()
}

/// Derive transfer tuning from the source/destination environment
///
/// The override (from `nas_mode` config) short-circuits detection in either
/// direction; otherwise either endpoint being network-mounted activates the
/// NAS profile.
#[must_use]
pub fn auto_tune(
    src: &Path,
    dst: &Path,
    nas_override: Option<bool>,
    base_concurrency: usize,
) -> TransferTuning {
    let nas = match nas_override {
        Some(forced) => forced,
        None => {
            detect_network_filesystem(src).is_network || detect_network_filesystem(dst).is_network
        }
    };
    if nas {
        log::info!("NAS profile active (src={}, dst={})", src.display(), dst.display());
        TransferTuning::network(base_concurrency)
    } else {
        TransferTuning::local(base_concurrency)
    }
}

/// Ensure the probe result type is usable in errors
impl std::fmt::Display for NetworkFsInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_network {
            write!(
                f,
                "network ({})",
                self.protocol.as_deref().unwrap_or("unknown protocol")
            )
        } else {
            f.write_str("local")
        }
    }
}

/// Stat a file for the scanner's identity key
///
/// Returns `(dev, ino, size, mtime_unix)`; dev/ino are zero on platforms
/// without them, which pushes the key derivation onto its portable fallback.
///
/// # Errors
/// Propagates the underlying stat failure.
pub fn identity_stat(path: &Path) -> Result<(u64, u64, u64, i64)> {
    let meta = fs::metadata(path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok((meta.dev(), meta.ino(), meta.len(), mtime))
    }
    #[cfg(not(unix))]
    {
        Ok((0, 0, meta.len(), mtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_filesystem_for_same_directory() {
        let dir = tempdir().unwrap();
        assert!(is_same_filesystem(dir.path(), dir.path()));
        // A file that does not exist yet resolves through its parent.
        assert!(is_same_filesystem(dir.path(), &dir.path().join("future/nested.flac")));
    }

    #[test]
    fn case_probe_cleans_up_markers() {
        let dir = tempdir().unwrap();
        let result = detect_case_sensitivity(dir.path());
        assert_ne!(result, CaseSensitivity::Unknown);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn tuning_profiles() {
        let local = TransferTuning::local(8);
        assert_eq!(local.concurrency, 8);
        assert!(!local.retries_enabled);

        let nas = TransferTuning::network(8);
        assert_eq!(nas.concurrency, 4);
        assert_eq!(nas.buffer_bytes, 256 * 1024);
        assert!(nas.retries_enabled);
    }

    #[test]
    fn override_beats_detection() {
        let dir = tempdir().unwrap();
        let forced = auto_tune(dir.path(), dir.path(), Some(true), 8);
        assert!(forced.nas_profile);
        let disabled = auto_tune(dir.path(), dir.path(), Some(false), 8);
        assert!(!disabled.nas_profile);
    }

    #[test]
    fn identity_stat_reads_size() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x.mp3");
        fs::write(&file, b"12345").unwrap();
        let (_, _, size, mtime) = identity_stat(&file).unwrap();
        assert_eq!(size, 5);
        assert!(mtime > 0);
    }
}
