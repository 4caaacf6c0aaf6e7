//! Retry logic for transient I/O failures
//!
//! Exponential-backoff wrapper used around every executor I/O step and the
//! extractor's probe calls. Only errors classified as transient are retried;
//! everything else fails the step on the first attempt.

use std::time::Duration;

use crate::error::{AppError, Result};

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial delay between attempts in milliseconds
    pub initial_delay_ms: u64,
    /// Delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Profile for network-mounted paths: slower start, higher cap
    #[must_use]
    pub const fn nas() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

#[cfg(unix)]
const RETRYABLE_ERRNOS: &[i32] = &[
    libc::EAGAIN,
    libc::ETIMEDOUT,
    libc::ECONNRESET,
    libc::ECONNABORTED,
    libc::ECONNREFUSED,
    libc::ENETDOWN,
    libc::ENETUNREACH,
    libc::EHOSTDOWN,
    libc::EHOSTUNREACH,
    libc::EIO,
];

const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "temporarily unavailable",
    "timed out",
    "network is unreachable",
    "host is down",
    "input/output error",
];

/// Whether an I/O error is worth retrying
#[must_use]
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    if let Some(errno) = err.raw_os_error() {
        return RETRYABLE_ERRNOS.contains(&errno);
    }
    let message = err.to_string().to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|s| message.contains(s))
}

/// Whether an [`AppError`] is worth retrying
#[must_use]
pub fn is_retryable(err: &AppError) -> bool {
    err.is_transient()
}

/// Run `operation` with exponential backoff on transient failures
///
/// Calls the operation up to `policy.max_attempts` times while it keeps
/// failing transiently; a non-retryable error is returned after the first
/// attempt. `what` names the operation in log lines.
///
/// # Errors
/// Returns the last error after attempts are exhausted, or the first
/// non-retryable error.
pub fn retry_with_backoff<T>(
    policy: RetryPolicy,
    what: &str,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay = policy.initial_delay_ms;
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_attempts.max(1) {
                    return Err(err);
                }
                log::debug!(
                    "{what}: transient failure (attempt {attempt}/{}): {err}; retrying in {delay}ms",
                    policy.max_attempts
                );
                std::thread::sleep(Duration::from_millis(delay));
                delay = (delay.saturating_mul(2)).min(policy.max_delay_ms);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op<'a>(
        counter: &'a AtomicU32,
        failures: u32,
        err: impl Fn() -> AppError + 'a,
    ) -> impl FnMut() -> Result<u32> + 'a {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(err())
            } else {
                Ok(n)
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn errno_classification() {
        assert!(is_retryable_io(&std::io::Error::from_raw_os_error(libc::ETIMEDOUT)));
        assert!(is_retryable_io(&std::io::Error::from_raw_os_error(libc::EIO)));
        assert!(!is_retryable_io(&std::io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_retryable_io(&std::io::Error::from_raw_os_error(libc::EACCES)));
    }

    #[test]
    fn substring_classification() {
        let err = std::io::Error::other("Connection reset by peer");
        assert!(is_retryable_io(&err));
        let err = std::io::Error::other("bad superblock");
        assert!(!is_retryable_io(&err));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 3,
        };
        let result = retry_with_backoff(
            policy,
            "test",
            counting_op(&counter, 2, || AppError::Transient("t".into())),
        );
        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausts_attempts_on_persistent_transient_failure() {
        let counter = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 3,
        };
        let result = retry_with_backoff(
            policy,
            "test",
            counting_op(&counter, 99, || AppError::Transient("t".into())),
        );
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn non_retryable_fails_immediately() {
        let counter = AtomicU32::new(0);
        let result = retry_with_backoff(
            RetryPolicy::default(),
            "test",
            counting_op(&counter, 99, || AppError::NotFound("gone".into())),
        );
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nas_profile_differs() {
        let nas = RetryPolicy::nas();
        assert_eq!(nas.initial_delay_ms, 200);
        assert_eq!(nas.max_delay_ms, 10_000);
        assert_eq!(nas.max_attempts, 3);
    }
}
