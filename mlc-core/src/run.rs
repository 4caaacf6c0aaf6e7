//! Run-wide context
//!
//! One `RunContext` is built per invocation and handed to every stage
//! constructor: configuration, the state store, the event log, the cancel
//! token, and the optional artist normalizer. Nothing pipeline-scoped lives
//! in process globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::events::EventLog;
use crate::normalize::musicbrainz::NameNormalizer;

/// Cooperative cancellation flag shared by every worker of a run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, un-cancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; workers observe it at their next loop turn
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a pipeline stage needs, passed explicitly
#[derive(Clone)]
pub struct RunContext {
    /// Validated run configuration
    pub config: Config,
    /// State store handle
    pub db: Database,
    /// Event log (possibly the null log)
    pub events: Arc<EventLog>,
    /// Run-wide cancellation
    pub cancel: CancelToken,
    /// External artist canonicalizer, when enabled
    pub normalizer: Option<Arc<dyn NameNormalizer>>,
}

impl RunContext {
    /// Context without a normalizer
    #[must_use]
    pub fn new(config: Config, db: Database, events: Arc<EventLog>) -> Self {
        Self {
            config,
            db,
            events,
            cancel: CancelToken::new(),
            normalizer: None,
        }
    }

    /// Attach an artist normalizer
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn NameNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Attach an externally-owned cancel token (the binary's signal handler)
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Borrow the normalizer as a trait object
    #[must_use]
    pub fn normalizer(&self) -> Option<&dyn NameNormalizer> {
        self.normalizer.as_deref()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("normalizer", &self.normalizer.is_some())
            .finish_non_exhaustive()
    }
}

/// Cap on error samples carried in a stage summary
pub const SUMMARY_ERROR_CAP: usize = 10;

/// Error tally shared by the stage summaries
#[derive(Debug, Clone, Default)]
pub struct ErrorTally {
    /// Total error count
    pub count: u64,
    /// First few error descriptions, for the end-of-stage report
    pub samples: Vec<String>,
}

impl ErrorTally {
    /// Record one error, keeping at most [`SUMMARY_ERROR_CAP`] samples
    pub fn push(&mut self, message: impl Into<String>) {
        self.count += 1;
        if self.samples.len() < SUMMARY_ERROR_CAP {
            self.samples.push(message.into());
        }
    }

    /// Merge another tally into this one
    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        for sample in &other.samples {
            if self.samples.len() >= SUMMARY_ERROR_CAP {
                break;
            }
            self.samples.push(sample.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn error_tally_caps_samples() {
        let mut tally = ErrorTally::default();
        for i in 0..20 {
            tally.push(format!("e{i}"));
        }
        assert_eq!(tally.count, 20);
        assert_eq!(tally.samples.len(), SUMMARY_ERROR_CAP);
    }
}
