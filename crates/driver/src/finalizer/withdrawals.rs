//! Withdrawal finalization
use std::collections::{HashMap, HashSet};

use alloy_primitives::B256;
use extractor::WithdrawalPayout;
use eyre::{Result, eyre};
use store::{
    CursorAdvance, EventCategory, ProgressUpdate, ScanRange, WithdrawalCompletion,
    WithdrawalFilter, WithdrawalStatus, WriteMode,
};
use tracing::info;

use crate::{Services, StageReport};

/// Complete the `Relayed` withdrawals whose L1 payout appears in the next L1 range.
///
/// The payout cursor advances to the end of the range whether or not anything matched.
pub async fn finalize_withdrawals(services: &Services) -> Result<StageReport> {
    let repos = &services.repos;
    let category = EventCategory::WithdrawalRelay;

    let head = services.extractor.l1_head().await?;
    let cursor = repos.checkpoints.get(category).await?;
    let Some(range) = ScanRange::resolve(cursor.as_ref(), services.deployed.liquidity, head) else {
        info!(%category, head, "No new blocks to scan");
        return Ok(StageReport::skipped(category));
    };
    info!(%category, start = range.start, end = range.end, "Scanning range");

    let relayed = repos
        .withdrawals
        .list_all(&WithdrawalFilter {
            status: Some(WithdrawalStatus::Relayed),
            ..Default::default()
        })
        .await?;
    let hashes: Vec<B256> = relayed.iter().map(|w| w.hash).collect();

    let payouts = if hashes.is_empty() {
        Vec::new()
    } else {
        services.extractor.withdrawal_payouts(&hashes, range.start, range.end).await?
    };
    let payouts = first_payouts(payouts);

    let completions = if payouts.is_empty() {
        Vec::new()
    } else {
        let unstamped: Vec<u64> = payouts
            .iter()
            .filter(|p| p.block_timestamp.is_none())
            .map(|p| p.block_number)
            .collect();
        let timestamps = services.extractor.l1_block_timestamps(unstamped).await?;
        payouts.iter().map(|p| to_completion(p, &timestamps)).collect::<Result<Vec<_>>>()?
    };

    if !completions.is_empty() {
        repos.withdrawals.upsert_batch(&completions, WriteMode::Merge).await?;
    }
    info!(
        relayed = relayed.len(),
        completed = completions.len(),
        pending = relayed.len().saturating_sub(completions.len()),
        "Withdrawals finalized"
    );

    let advance = CursorAdvance::new(category, cursor.as_ref(), range.end);
    let outcome =
        repos.commit_progress(&ProgressUpdate { cursors: vec![advance], stats: None }).await?;
    Ok(StageReport {
        category,
        range: Some(range),
        found: payouts.len(),
        written: completions.len(),
        outcome,
    })
}

/// One payout per withdrawal hash, the earliest observed.
fn first_payouts(mut payouts: Vec<WithdrawalPayout>) -> Vec<WithdrawalPayout> {
    payouts.sort_by_key(|p| p.block_number);
    let mut seen = HashSet::new();
    payouts.retain(|p| seen.insert(p.withdrawal_hash));
    payouts
}

fn to_completion(
    payout: &WithdrawalPayout,
    timestamps: &HashMap<u64, u64>,
) -> Result<WithdrawalCompletion> {
    let liquidity_timestamp = payout
        .block_timestamp
        .or_else(|| timestamps.get(&payout.block_number).copied())
        .ok_or_else(|| eyre!("no timestamp for L1 block {}", payout.block_number))?;

    Ok(WithdrawalCompletion {
        hash: payout.withdrawal_hash,
        status: WithdrawalStatus::Completed,
        liquidity_tx_hash: payout.tx_hash,
        liquidity_timestamp,
    })
}
