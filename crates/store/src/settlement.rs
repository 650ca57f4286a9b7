//! Block status promotions, and the stats contributions they release, applied atomically.
//!
//! A block's transactions enter `totalTransactionCount` exactly once: in the transaction that
//! first observes it proven and valid, which also sets [`COUNTED_FIELD`] on the block. Status
//! changes are applied against the block as stored at that moment and only ever move forward.
use std::sync::{Mutex, PoisonError};

use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::info;

use crate::{
    document::{DocRef, Document, DocumentStore},
    models::{BLOCKS, Block, BlockPromotion, BlockStatus, BlockType, BlockValidity, hash_key},
    repository::{decode, encode},
    stats::{STATS, SUMMARY_KEY, StatsDelta, StatsSummary},
};

/// Block field set once the block's transactions were added to the summary.
pub const COUNTED_FIELD: &str = "transactionsCounted";

/// What [`settle_blocks`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settlement {
    /// Blocks whose status moved forward
    pub promoted: usize,
    /// Blocks whose transactions were added to the summary
    pub counted: usize,
    /// Transactions added to the summary
    pub transactions: u64,
}

impl Settlement {
    const fn add(self, other: Self) -> Self {
        Self {
            promoted: self.promoted + other.promoted,
            counted: self.counted + other.counted,
            transactions: self.transactions + other.transactions,
        }
    }
}

/// Apply `promotions` to the stored blocks and fold the newly counted blocks into the summary.
///
/// Promotions are split into transactions no larger than the store's batch size. Each one
/// re-reads its blocks and the summary, so concurrent or repeated calls with the same
/// promotions count every block once.
pub async fn settle_blocks(
    store: &dyn DocumentStore,
    promotions: &[BlockPromotion],
) -> Result<Settlement> {
    // one slot of every transaction goes to the summary
    let chunk_size = store.max_batch_size().saturating_sub(1).max(1);
    let mut total = Settlement::default();

    for chunk in promotions.chunks(chunk_size) {
        let mut reads = vec![DocRef::new(STATS, SUMMARY_KEY)];
        reads.extend(chunk.iter().map(|p| DocRef::new(BLOCKS, hash_key(&p.hash))));

        let outcome = Mutex::new(Settlement::default());
        let apply = |current: &[Option<Document>]| -> Result<Vec<(DocRef, Document)>> {
            let Some((summary, blocks)) = current.split_first() else { return Ok(Vec::new()) };
            let mut settlement = Settlement::default();
            let mut delta = StatsDelta::default();
            let mut writes = Vec::new();

            for (promotion, stored) in chunk.iter().zip(blocks) {
                let key = hash_key(&promotion.hash);
                let stored =
                    stored.as_ref().ok_or_else(|| eyre!("block {key} is not stored"))?;
                let Some(patch) = settle(promotion, stored, &mut settlement, &mut delta)? else {
                    continue;
                };
                writes.push((DocRef::new(BLOCKS, key), patch));
            }

            if !delta.is_empty() {
                let summary: StatsSummary =
                    summary.clone().map(decode).transpose()?.unwrap_or_default();
                writes.push((DocRef::new(STATS, SUMMARY_KEY), encode(&summary.apply(&delta))?));
            }
            *outcome.lock().unwrap_or_else(PoisonError::into_inner) = settlement;
            Ok(writes)
        };

        store.transact(&reads, &apply).await.wrap_err("failed to settle blocks")?;
        let settled = outcome.into_inner().unwrap_or_else(PoisonError::into_inner);
        total = total.add(settled);
    }

    info!(
        requested = promotions.len(),
        promoted = total.promoted,
        counted = total.counted,
        transactions = total.transactions,
        "Blocks settled"
    );
    Ok(total)
}

/// Patch to write on one stored block, updating `settlement` and `delta` with its effect.
fn settle(
    promotion: &BlockPromotion,
    stored: &Document,
    settlement: &mut Settlement,
    delta: &mut StatsDelta,
) -> Result<Option<Document>> {
    let counted = stored.get(COUNTED_FIELD).and_then(Value::as_bool).unwrap_or(false);
    let mut block: Block = decode(stored.clone())?;
    let mut patch = Document::new();

    if promotion.status > block.status {
        block.status = promotion.status;
        patch.insert("status".to_owned(), serde_json::to_value(block.status)?);
        if block.block_validity == BlockValidity::Pending {
            block.block_validity = promotion.block_validity;
            patch.insert("blockValidity".to_owned(), serde_json::to_value(block.block_validity)?);
        }
        if block.next_account_id.is_none() {
            if let Some(next_account_id) = promotion.next_account_id {
                block.next_account_id = Some(next_account_id);
                patch.insert("nextAccountId".to_owned(), next_account_id.into());
            }
        }
        settlement.promoted += 1;
    }

    let contributes =
        block.status != BlockStatus::Indexing && block.block_validity == BlockValidity::Valid;
    if contributes && !counted {
        delta.transaction_count += block.transaction_count;
        patch.insert(COUNTED_FIELD.to_owned(), Value::Bool(true));
        settlement.counted += 1;
        settlement.transactions += block.transaction_count;
    }
    if contributes && block.block_type == BlockType::Registration {
        delta.l2_wallet_count = delta.l2_wallet_count.max(block.next_account_id);
    }

    Ok((!patch.is_empty()).then_some(patch))
}
