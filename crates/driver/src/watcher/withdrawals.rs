//! Queued withdrawal ingestion
use std::collections::HashMap;

use alloy_primitives::B256;
use chainio::withdrawal::IWithdrawal::Withdrawal as WithdrawalData;
use extractor::{QueuedWithdrawals, TokenMetadata};
use eyre::{Result, eyre};
use store::{
    CursorAdvance, EventCategory, ProgressUpdate, ScanRange, Withdrawal, WithdrawalStatus,
    WithdrawalType, WriteMode,
};
use tracing::info;

use crate::{Services, StageReport};

/// A queue event of either bridge path.
#[derive(Debug)]
struct Queued<'a> {
    hash: B256,
    data: &'a WithdrawalData,
    kind: WithdrawalType,
    tx_hash: B256,
    block_number: u64,
    block_timestamp: Option<u64>,
}

fn flatten(queued: &QueuedWithdrawals) -> Vec<Queued<'_>> {
    let direct = queued.direct.iter().map(|log| Queued {
        hash: log.event.withdrawalHash,
        data: &log.event.withdrawal,
        kind: WithdrawalType::Direct,
        tx_hash: log.tx_hash,
        block_number: log.block_number,
        block_timestamp: log.block_timestamp,
    });
    let claimable = queued.claimable.iter().map(|log| Queued {
        hash: log.event.withdrawalHash,
        data: &log.event.withdrawal,
        kind: WithdrawalType::Claimable,
        tx_hash: log.tx_hash,
        block_number: log.block_number,
        block_timestamp: log.block_timestamp,
    });
    direct.chain(claimable).collect()
}

/// Ingest the withdrawals queued in L2 blocks up to `head`, as `Relayed`.
pub async fn ingest_withdrawals(services: &Services, head: u64) -> Result<StageReport> {
    let repos = &services.repos;
    let category = EventCategory::WithdrawalQueue;

    let cursor = repos.checkpoints.get(category).await?;
    let Some(range) = ScanRange::resolve(cursor.as_ref(), services.deployed.withdrawal, head)
    else {
        info!(%category, head, "No new blocks to scan");
        return Ok(StageReport::skipped(category));
    };
    info!(%category, start = range.start, end = range.end, "Scanning range");

    let queued = services.extractor.queued_withdrawals(range.start, range.end).await?;
    let advance = CursorAdvance::new(category, cursor.as_ref(), range.end);
    let update = ProgressUpdate { cursors: vec![advance], stats: None };
    if queued.is_empty() {
        let outcome = repos.commit_progress(&update).await?;
        return Ok(StageReport { category, range: Some(range), found: 0, written: 0, outcome });
    }

    let queued = flatten(&queued);
    let unstamped: Vec<u64> =
        queued.iter().filter(|q| q.block_timestamp.is_none()).map(|q| q.block_number).collect();
    let (tokens, timestamps) = tokio::try_join!(
        services.extractor.token_metadata(queued.iter().map(|q| q.data.tokenIndex)),
        services.extractor.l2_block_timestamps(unstamped),
    )?;

    let withdrawals = queued
        .iter()
        .map(|q| to_withdrawal(q, &tokens, &timestamps))
        .collect::<Result<Vec<_>>>()?;

    let created = repos.withdrawals.upsert_batch(&withdrawals, WriteMode::Create).await?;
    info!(found = withdrawals.len(), created = created.len(), "Withdrawals ingested");

    let outcome = repos.commit_progress(&update).await?;
    Ok(StageReport {
        category,
        range: Some(range),
        found: withdrawals.len(),
        written: created.len(),
        outcome,
    })
}

fn to_withdrawal(
    queued: &Queued<'_>,
    tokens: &HashMap<u32, TokenMetadata>,
    timestamps: &HashMap<u64, u64>,
) -> Result<Withdrawal> {
    let token_index = queued.data.tokenIndex;
    let token = tokens
        .get(&token_index)
        .ok_or_else(|| eyre!("no token metadata for token index {token_index}"))?;
    let relayed_timestamp = queued
        .block_timestamp
        .or_else(|| timestamps.get(&queued.block_number).copied())
        .ok_or_else(|| eyre!("no timestamp for L2 block {}", queued.block_number))?;

    Ok(Withdrawal {
        hash: queued.hash,
        recipient: queued.data.recipient,
        token_index,
        token_type: token.token_type,
        amount: queued.data.amount,
        kind: queued.kind,
        status: WithdrawalStatus::Relayed,
        relayed_tx_hash: Some(queued.tx_hash),
        relayed_timestamp: Some(relayed_timestamp),
        liquidity_tx_hash: None,
        liquidity_timestamp: None,
    })
}
