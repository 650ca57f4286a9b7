//! Block classification from proof data
use proof::ValidityPis;
use store::{BlockStatus, BlockValidity};

/// Lifecycle state of a block derived from the proof service's view of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Status to store
    pub status: BlockStatus,
    /// Validity to store
    pub validity: BlockValidity,
    /// Next account id reported by the proof
    pub next_account_id: Option<u64>,
}

impl Classification {
    /// Classification of a block whose proof is not available yet.
    pub const PENDING: Self = Self {
        status: BlockStatus::Indexing,
        validity: BlockValidity::Pending,
        next_account_id: None,
    };
}

/// Validity of a block carrying `transaction_count` transactions, given its proof.
pub const fn block_validity(transaction_count: u64, proof: &ValidityPis) -> BlockValidity {
    if transaction_count == 0 {
        BlockValidity::Empty
    } else if proof.is_valid_block {
        BlockValidity::Valid
    } else {
        BlockValidity::Invalid
    }
}

/// Status of a proven block given the chain-wide latest proven block number.
pub const fn proven_status(block_number: u64, latest_proven: u64) -> BlockStatus {
    if block_number <= latest_proven {
        BlockStatus::Completed
    } else {
        BlockStatus::Proving
    }
}

/// Classify a block at ingestion time.
pub fn classify_block(
    block_number: u64,
    transaction_count: u64,
    proof: Option<&ValidityPis>,
    latest_proven: u64,
) -> Classification {
    let Some(proof) = proof else { return Classification::PENDING };
    Classification {
        status: proven_status(block_number, latest_proven),
        validity: block_validity(transaction_count, proof),
        next_account_id: Some(proof.public_state.next_account_id),
    }
}
