//! Block finalization
use proof::ValidityPis;
use store::{Block, BlockFilter, BlockPromotion, BlockStatus, Settlement, document::Direction};
use tracing::info;

use crate::{Services, classify::block_validity};

/// Outcome of one block finalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFinalization {
    /// Latest proven block number the pass used
    pub latest_proven: u64,
    /// `Indexing` blocks re-checked against the proof service
    pub indexing_checked: usize,
    /// `Proving` blocks checked against the latest proven block
    pub proving_checked: usize,
    /// Promotions and counts applied to the store; blocks another run already promoted are
    /// left out
    pub settled: Settlement,
}

/// Promote `Indexing` and `Proving` blocks that the latest proven block now covers.
///
/// Only the oldest page of `Indexing` blocks is re-checked per pass; the rest wait for the
/// next run.
pub async fn finalize_blocks(services: &Services) -> eyre::Result<BlockFinalization> {
    let repos = &services.repos;
    let indexing = BlockFilter { status: Some(BlockStatus::Indexing), ..Default::default() };
    let proving = BlockFilter { status: Some(BlockStatus::Proving), ..Default::default() };

    let (latest_proven, indexing, proving) = tokio::try_join!(
        services.proofs.latest_proven_block_number(),
        repos.blocks.list_page_ordered(
            &indexing,
            None,
            Some(services.indexing_page_size),
            Direction::Asc
        ),
        repos.blocks.list_all(&proving),
    )?;
    let indexing = indexing.items;
    info!(
        latest_proven,
        indexing = indexing.len(),
        proving = proving.len(),
        "Loaded unfinalized blocks"
    );

    let proofs = services
        .proof_throttle
        .run(&indexing, |block| services.proofs.validity_pis(block.block_number))
        .await?;

    let from_indexing = indexing
        .iter()
        .zip(&proofs)
        .filter_map(|(block, proof)| promote_indexing(block, proof.as_ref()?, latest_proven));
    let from_proving = proving.iter().filter_map(|block| promote_proving(block, latest_proven));
    let promotions: Vec<BlockPromotion> = from_indexing.chain(from_proving).collect();

    let mut report = BlockFinalization {
        latest_proven,
        indexing_checked: indexing.len(),
        proving_checked: proving.len(),
        settled: Settlement::default(),
    };
    if promotions.is_empty() {
        info!(latest_proven, "No blocks to finalize");
        return Ok(report);
    }

    report.settled = repos.settle_blocks(&promotions).await?;
    info!(
        candidates = promotions.len(),
        promoted = report.settled.promoted,
        transactions = report.settled.transactions,
        "Blocks finalized"
    );
    Ok(report)
}

/// Completion of an `Indexing` block whose proof is out and covered by `latest_proven`.
fn promote_indexing(
    block: &Block,
    proof: &ValidityPis,
    latest_proven: u64,
) -> Option<BlockPromotion> {
    (block.block_number <= latest_proven).then(|| BlockPromotion {
        hash: block.hash,
        status: BlockStatus::Completed,
        block_validity: block_validity(block.transaction_count, proof),
        next_account_id: Some(proof.public_state.next_account_id),
    })
}

/// Completion of a `Proving` block covered by `latest_proven`. Its validity was decided at
/// ingestion.
fn promote_proving(block: &Block, latest_proven: u64) -> Option<BlockPromotion> {
    (block.block_number <= latest_proven).then_some(BlockPromotion {
        hash: block.hash,
        status: BlockStatus::Completed,
        block_validity: block.block_validity,
        next_account_id: None,
    })
}
