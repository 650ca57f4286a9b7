//! Rollup block ingestion
use chainio::rollup::{BlockSubmission, IRollup::BlockPosted, SubmissionKind};
use extractor::EventLog;
use eyre::Result;
use futures::{StreamExt, TryStreamExt, stream};
use proof::ValidityPis;
use store::{
    Block, BlockPromotion, BlockStatus, BlockType, CursorAdvance, EventCategory, ProgressUpdate,
    ScanRange, Settlement, StatsDelta, WriteMode,
};
use tracing::info;

use crate::{Services, StageReport, classify::classify_block};

/// Submission transactions fetched concurrently.
const SUBMISSION_CONCURRENCY: usize = 8;

/// Ingest the rollup blocks posted in L2 blocks up to `head`.
pub async fn ingest_blocks(services: &Services, head: u64) -> Result<StageReport> {
    let repos = &services.repos;
    let category = EventCategory::Block;

    let cursor = repos.checkpoints.get(category).await?;
    let Some(range) = ScanRange::resolve(cursor.as_ref(), services.deployed.rollup, head) else {
        info!(%category, head, "No new blocks to scan");
        return Ok(StageReport::skipped(category));
    };
    info!(%category, start = range.start, end = range.end, "Scanning range");

    let events = services.extractor.block_posted_events(range.start, range.end).await?;
    let advance = CursorAdvance::new(category, cursor.as_ref(), range.end);
    if events.is_empty() {
        let update = ProgressUpdate { cursors: vec![advance], stats: None };
        let outcome = repos.commit_progress(&update).await?;
        return Ok(StageReport { category, range: Some(range), found: 0, written: 0, outcome });
    }

    let submissions: Vec<BlockSubmission> = stream::iter(&events)
        .map(|log| services.extractor.block_submission(log.tx_hash))
        .buffered(SUBMISSION_CONCURRENCY)
        .try_collect()
        .await?;

    let latest_proven = services.proofs.latest_proven_block_number().await?;
    let proofs = services
        .proof_throttle
        .run(&events, |log| services.proofs.validity_pis(log.event.block_number()))
        .await?;

    let blocks: Vec<Block> = events
        .iter()
        .zip(&submissions)
        .zip(&proofs)
        .map(|((log, submission), proof)| to_block(log, submission, proof.as_ref(), latest_proven))
        .collect();

    let created = repos.blocks.upsert_batch(&blocks, WriteMode::Create).await?;

    // Blocks already stored by an interrupted run are promoted to what this run observed, and
    // every proven block is counted unless a previous run or the finalizer already did.
    let proven: Vec<BlockPromotion> = blocks.iter().filter_map(proven_state).collect();
    let settled = if proven.is_empty() {
        Settlement::default()
    } else {
        repos.settle_blocks(&proven).await?
    };

    let latest_block_number = blocks.iter().map(|block| block.block_number).max();
    info!(
        found = blocks.len(),
        created = created.len(),
        promoted = settled.promoted,
        transactions = settled.transactions,
        "Blocks ingested"
    );

    let delta = StatsDelta { latest_block_number, ..Default::default() };
    let update = ProgressUpdate { cursors: vec![advance], stats: Some(delta) };
    let outcome = repos.commit_progress(&update).await?;
    Ok(StageReport {
        category,
        range: Some(range),
        found: blocks.len(),
        written: created.len() + settled.promoted,
        outcome,
    })
}

fn to_block(
    log: &EventLog<BlockPosted>,
    submission: &BlockSubmission,
    proof: Option<&ValidityPis>,
    latest_proven: u64,
) -> Block {
    let block_number = log.event.block_number();
    let class = classify_block(block_number, submission.transaction_count, proof, latest_proven);
    let block_type = match submission.kind {
        SubmissionKind::Registration => BlockType::Registration,
        SubmissionKind::NonRegistration => BlockType::NonRegistration,
    };

    Block {
        hash: log.event.block_hash(),
        block_number,
        status: class.status,
        block_validity: class.validity,
        block_type,
        transaction_count: submission.transaction_count,
        builder_address: log.event.blockBuilder,
        timestamp: log.event.timestamp,
        rollup_tx_hash: log.tx_hash,
        tx_digest: submission.tx_tree_root,
        aggregator_signature: submission.aggregated_signature.clone(),
        next_account_id: class.next_account_id,
    }
}

/// The state this run observed for a block classified with a proof.
fn proven_state(block: &Block) -> Option<BlockPromotion> {
    (block.status != BlockStatus::Indexing).then(|| BlockPromotion {
        hash: block.hash,
        status: block.status,
        block_validity: block.block_validity,
        next_account_id: block.next_account_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use store::BlockValidity;

    fn block(number: u64, status: BlockStatus, validity: BlockValidity, txs: u64) -> Block {
        Block {
            hash: B256::with_last_byte(number as u8),
            block_number: number,
            status,
            block_validity: validity,
            block_type: BlockType::Registration,
            transaction_count: txs,
            builder_address: Address::ZERO,
            timestamp: 0,
            rollup_tx_hash: B256::ZERO,
            tx_digest: B256::ZERO,
            aggregator_signature: vec![],
            next_account_id: (status != BlockStatus::Indexing).then_some(number * 10),
        }
    }

    #[test]
    fn only_blocks_classified_with_a_proof_are_settled() {
        let pending = block(1, BlockStatus::Indexing, BlockValidity::Pending, 4);
        assert_eq!(proven_state(&pending), None);

        let proving = block(2, BlockStatus::Proving, BlockValidity::Invalid, 4);
        let state = proven_state(&proving).unwrap();
        assert_eq!(state.hash, proving.hash);
        assert_eq!(state.status, BlockStatus::Proving);
        assert_eq!(state.block_validity, BlockValidity::Invalid);
        assert_eq!(state.next_account_id, Some(20));
    }
}
