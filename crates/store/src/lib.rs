//! Persistence for the explorer indexer: entity repositories, event cursors and aggregate stats
//! over a document store.
use std::sync::Arc;

use eyre::Result;

pub mod checkpoint;
pub mod document;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod models;
pub mod mongo;
pub mod progress;
pub mod repository;
pub mod settlement;
pub mod stats;

pub use checkpoint::{CheckpointStore, EventCategory, EventCursor, ScanRange};
pub use document::{DocumentStore, WriteMode};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use models::*;
pub use mongo::MongoStore;
pub use progress::{CursorAdvance, ProgressOutcome, ProgressUpdate};
pub use repository::{DEFAULT_PAGE_SIZE, Entity, Page, Record, Repository};
pub use settlement::Settlement;
pub use stats::{StatsDelta, StatsStore, StatsSummary};

/// All repositories over one shared store.
#[derive(Debug, Clone)]
pub struct Repositories {
    /// Rollup blocks
    pub blocks: Repository<Block>,
    /// L1 deposits
    pub deposits: Repository<Deposit>,
    /// Withdrawals
    pub withdrawals: Repository<Withdrawal>,
    /// Event cursors
    pub checkpoints: CheckpointStore,
    /// Aggregate stats
    pub stats: StatsStore,
    store: Arc<dyn DocumentStore>,
}

impl Repositories {
    /// Create the repositories over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            blocks: Repository::new(Arc::clone(&store)),
            deposits: Repository::new(Arc::clone(&store)),
            withdrawals: Repository::new(Arc::clone(&store)),
            checkpoints: CheckpointStore::new(Arc::clone(&store)),
            stats: StatsStore::new(Arc::clone(&store)),
            store,
        }
    }

    /// Record a run's cursor advances and stats delta atomically.
    pub async fn commit_progress(&self, update: &ProgressUpdate) -> Result<ProgressOutcome> {
        progress::commit_progress(self.store.as_ref(), update).await
    }

    /// Apply block promotions and count the blocks they prove valid, once per block.
    pub async fn settle_blocks(&self, promotions: &[BlockPromotion]) -> Result<Settlement> {
        settlement::settle_blocks(self.store.as_ref(), promotions).await
    }
}
