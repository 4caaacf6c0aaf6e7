//! CLI error handling and exit-code mapping

use mlc_core::AppError;

/// Exit code for user or configuration errors
pub const EXIT_USAGE: i32 = 1;
/// Exit code when a stage completed with per-file errors
pub const EXIT_STAGE_ERRORS: i32 = 2;
/// Exit code for fatal failures (store open, cancellation)
pub const EXIT_FATAL: i32 = 3;

/// Errors surfacing from command execution
#[derive(Debug)]
pub enum CliError {
    /// Bad flags, bad config, missing directories
    Usage(String),
    /// The stage ran and produced output, but some files failed
    StageErrors(String),
    /// The run could not proceed or was cancelled
    Fatal(String),
}

impl CliError {
    /// Process exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            Self::StageErrors(_) => EXIT_STAGE_ERRORS,
            Self::Fatal(_) => EXIT_FATAL,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(msg) | Self::StageErrors(msg) | Self::Fatal(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<AppError> for CliError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidConfig(msg) => Self::Usage(msg),
            AppError::Cancelled => Self::Fatal("operation cancelled".to_string()),
            AppError::Database(e) => Self::Fatal(e.to_string()),
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Fatal(err.to_string())
    }
}

/// Result alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(CliError::Usage(String::new()).exit_code(), 1);
        assert_eq!(CliError::StageErrors(String::new()).exit_code(), 2);
        assert_eq!(CliError::Fatal(String::new()).exit_code(), 3);
    }

    #[test]
    fn app_errors_map_to_codes() {
        let usage: CliError = AppError::InvalidConfig("bad".into()).into();
        assert_eq!(usage.exit_code(), 1);
        let fatal: CliError = AppError::Cancelled.into();
        assert_eq!(fatal.exit_code(), 3);
    }
}
