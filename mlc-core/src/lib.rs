//! MLC Core - library cleaning pipeline
//!
//! This crate contains the five-stage pipeline (scan, extract, cluster,
//! score, plan+execute), the embedded state store that makes every stage
//! resumable and idempotent, and the supporting probes and normalizers.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod execute;
pub mod extract;
pub mod fsprobe;
pub mod model;
pub mod normalize;
pub mod plan;
pub mod run;
pub mod scan;
pub mod score;

// Re-exports from config module
pub use config::{Config, DuplicatePolicy, HashAlgo, TransferMode, VerifyMode};

// Re-exports from error module
pub use error::{AppError, Result};

// Re-exports from the store
pub use db::{Database, StoreTuning};

// Re-exports from the run context
pub use run::{CancelToken, RunContext};

// Stage entry points
pub use cluster::Clusterer;
pub use execute::Executor;
pub use extract::{ExtractSelector, Extractor};
pub use plan::Planner;
pub use scan::Scanner;
pub use score::Scorer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        cluster::{ClusterSummary, Clusterer},
        config::{Config, DuplicatePolicy, HashAlgo, TransferMode, VerifyMode},
        db::{Database, StoreTuning},
        error::{AppError, Result},
        events::{EventLevel, EventLog},
        execute::{ExecuteSummary, Executor},
        extract::{ExtractSelector, ExtractSummary, Extractor},
        plan::{PlanSummary, Planner},
        run::{CancelToken, RunContext},
        scan::{ScanSummary, Scanner},
        score::{ScoreSummary, Scorer},
    };
    pub use log::{debug, error, info, trace, warn};
}
