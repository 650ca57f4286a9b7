//! Ingestion: scan new chain activity into provisional records.
use std::time::Instant;

use eyre::{Context, Result};
use tracing::info;

use crate::{Services, StageReport};

mod blocks;
mod deposits;
mod withdrawals;

pub use blocks::ingest_blocks;
pub use deposits::ingest_deposits;
pub use withdrawals::ingest_withdrawals;

/// Chain heads read once at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heads {
    /// L1 head
    pub l1: u64,
    /// L2 head
    pub l2: u64,
}

/// Outcome of one watcher run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherReport {
    /// Rollup blocks
    pub blocks: StageReport,
    /// Deposits
    pub deposits: StageReport,
    /// Queued withdrawals
    pub withdrawals: StageReport,
}

/// Run the three ingestion stages concurrently. The first failing stage fails the run.
pub async fn run_watcher(services: &Services) -> Result<WatcherReport> {
    let started = Instant::now();
    info!("Watcher run started");

    let (l1, l2) = tokio::try_join!(services.extractor.l1_head(), services.extractor.l2_head())?;
    let heads = Heads { l1, l2 };
    info!(l1 = heads.l1, l2 = heads.l2, "Read chain heads");

    let (blocks, deposits, withdrawals) = tokio::try_join!(
        async { ingest_blocks(services, heads.l2).await.wrap_err("block ingestion failed") },
        async { ingest_deposits(services, heads.l1).await.wrap_err("deposit ingestion failed") },
        async {
            ingest_withdrawals(services, heads.l2).await.wrap_err("withdrawal ingestion failed")
        },
    )?;

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Watcher run completed");
    Ok(WatcherReport { blocks, deposits, withdrawals })
}
