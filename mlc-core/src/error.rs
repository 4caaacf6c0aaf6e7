//! Error handling for the MLC core
use crate::db::error::DatabaseError;
use thiserror::Error;

/// Central error type for the library cleaner
///
/// Variants correspond to the failure kinds the pipeline distinguishes:
/// per-file errors that are recorded and skipped, transient errors that are
/// retried, and fatal errors that abort the current stage.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// I/O related errors (file system, network, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Database errors from the state store
    #[error("Database error: {0}")]
    Database(DatabaseError),

    /// File format or operation cannot be handled
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// File was readable but could not be decoded
    #[error("Corrupt file: {0}")]
    Corrupt(String),

    /// Destination path collision between two plans
    #[error("Destination conflict: {0}")]
    Conflict(String),

    /// A required row, file, or external tool is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// User input rejected pre-flight
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// OS denied access
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Retryable network/IO failure
    #[error("Transient error: {0}")]
    Transient(String),

    /// No free space on the destination; fatal for the current execute run
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// Metadata extraction error
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Other errors not covered by specific variants
    #[error("{0}")]
    Other(String),
}

/// Result type alias for fallible operations in the MLC core
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Self::Permission(err.to_string()),
            _ => {
                if crate::execute::retry::is_retryable_io(&err) {
                    Self::Transient(err.to_string())
                } else if is_disk_full(&err) {
                    Self::DiskFull(err.to_string())
                } else {
                    Self::Io(err.to_string())
                }
            }
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        Self::Database(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {err}"))
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

/// Check whether an I/O error indicates an exhausted destination
pub fn is_disk_full(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOSPC)
    }
    #[cfg(not(unix))]
    {
        err.to_string().to_lowercase().contains("no space left")
    }
}

impl AppError {
    /// Convert a rusqlite::Error to AppError
    #[must_use]
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(err.to_string()))
    }

    /// Whether the error should be retried with backoff
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the error aborts the whole run rather than one file
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DiskFull(_) | Self::Cancelled | Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(AppError::from(err), AppError::NotFound(_)));
    }

    #[test]
    fn permission_denied_maps_to_permission() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(AppError::from(err), AppError::Permission(_)));
    }

    #[cfg(unix)]
    #[test]
    fn enospc_is_disk_full() {
        let err = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert!(is_disk_full(&err));
        assert!(AppError::from(err).is_fatal());
    }

    #[test]
    fn transient_classification() {
        assert!(AppError::Transient("reset".into()).is_transient());
        assert!(!AppError::Io("oops".into()).is_transient());
    }
}
