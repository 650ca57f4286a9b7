//! Watcher (ingestion) and finalizer pipelines of the explorer indexer.
//!
//! A run reads its progress from the store, scans or re-checks what changed since, writes the
//! records, and records its progress and aggregate contribution in one transaction. Block
//! transaction counts are the exception: they are added in the transaction that settles the
//! block's status. Runs hold no state between invocations.

pub mod classify;
pub mod context;
pub mod finalizer;
pub mod watcher;

pub use context::{DeployedBlocks, Services};
pub use finalizer::{FinalizerReport, run_finalizer};
pub use watcher::{WatcherReport, run_watcher};

use store::{EventCategory, ProgressOutcome, ScanRange};

/// What one pipeline stage did in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    /// Category the stage tracks
    pub category: EventCategory,
    /// Scanned range, `None` when there was nothing new to scan
    pub range: Option<ScanRange>,
    /// Number of records found in the range
    pub found: usize,
    /// Number of records newly created or promoted
    pub written: usize,
    /// How the progress update ended
    pub outcome: ProgressOutcome,
}

impl StageReport {
    /// Report of a stage that had nothing to scan.
    pub const fn skipped(category: EventCategory) -> Self {
        Self { category, range: None, found: 0, written: 0, outcome: ProgressOutcome::Skipped }
    }
}
