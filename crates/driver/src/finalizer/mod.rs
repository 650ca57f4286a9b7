//! Finalization: promote provisional records once proofs and payouts are observed.
use std::time::Instant;

use eyre::{Context, Result};
use tracing::info;

use crate::{Services, StageReport};

mod blocks;
mod withdrawals;

pub use blocks::{BlockFinalization, finalize_blocks};
pub use withdrawals::finalize_withdrawals;

/// Outcome of one finalizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizerReport {
    /// Block promotions
    pub blocks: BlockFinalization,
    /// Withdrawal completions
    pub withdrawals: StageReport,
}

/// Run block and withdrawal finalization concurrently. The first failing stage fails the run.
pub async fn run_finalizer(services: &Services) -> Result<FinalizerReport> {
    let started = Instant::now();
    info!("Finalizer run started");

    let (blocks, withdrawals) = tokio::try_join!(
        async { finalize_blocks(services).await.wrap_err("block finalization failed") },
        async { finalize_withdrawals(services).await.wrap_err("withdrawal finalization failed") },
    )?;

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Finalizer run completed");
    Ok(FinalizerReport { blocks, withdrawals })
}
