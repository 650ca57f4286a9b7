//! Persisted entities, their filters and the partial updates applied by finalization.
use alloy_primitives::{Address, B256, U256};
use chainio::TokenType;
use serde::{Deserialize, Serialize};

use crate::{
    document::{Condition, Direction, OrderBy},
    repository::{Entity, Record},
};

/// Collection of [`Block`]s.
pub const BLOCKS: &str = "blocks";
/// Collection of [`Deposit`]s.
pub const DEPOSITS: &str = "deposits";
/// Collection of [`Withdrawal`]s.
pub const WITHDRAWALS: &str = "withdrawals";

/// Store key of a content hash: `0x`-prefixed lowercase hex, identical to its serialized form.
pub fn hash_key(hash: &B256) -> String {
    format!("{hash:#x}")
}

/// Decimal string (de)serialization of [`U256`] amounts.
pub mod decimal {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize as a base-10 string.
    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserialize from a base-10 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10).map_err(D::Error::custom)
    }
}

/// Lifecycle of a rollup block. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Observed on chain, no proof yet
    Indexing,
    /// Proof available, not yet covered by the latest proven block
    Proving,
    /// Covered by the latest proven block
    Completed,
}

/// Validity of a block as reported by its proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockValidity {
    /// No proof yet
    Pending,
    /// Proof reports the block valid
    Valid,
    /// Proof reports the block invalid
    Invalid,
    /// Block carries no transactions
    Empty,
}

/// Account registration mode that produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// Senders register their public keys with the block
    Registration,
    /// Senders are referenced by existing account ids
    NonRegistration,
}

/// A rollup block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Canonical block hash
    pub hash: B256,
    /// Rollup block number
    pub block_number: u64,
    /// Lifecycle status
    pub status: BlockStatus,
    /// Proof-reported validity
    pub block_validity: BlockValidity,
    /// Registration mode
    pub block_type: BlockType,
    /// Number of transactions in the block
    pub transaction_count: u64,
    /// Address that posted the block
    pub builder_address: Address,
    /// Block timestamp, in seconds
    pub timestamp: u64,
    /// L2 transaction that posted the block
    pub rollup_tx_hash: B256,
    /// Root of the block's transaction tree
    pub tx_digest: B256,
    /// Aggregated BLS signature words
    pub aggregator_signature: Vec<B256>,
    /// Next account id after this block, from the first proof that confirmed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_account_id: Option<u64>,
}

/// Outcome of a deposit's on-chain rejection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Accepted by the liquidity contract
    Completed,
    /// Rejected by the liquidity contract
    Rejected,
}

/// A deposit into the liquidity contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    /// Deposit content hash, as recorded by the liquidity contract
    pub hash: B256,
    /// Sequential deposit id
    pub deposit_id: u64,
    /// Depositor
    pub sender: Address,
    /// Token registry index
    pub token_index: u32,
    /// Token standard
    pub token_type: TokenType,
    /// Deposited amount
    #[serde(with = "decimal")]
    pub amount: U256,
    /// L1 block of the deposit
    pub block_number: u64,
    /// Time the deposit was accepted, in seconds
    pub timestamp: u64,
    /// Rejection check outcome
    pub status: DepositStatus,
    /// L1 transaction of the deposit
    pub tx_hash: B256,
}

/// Lifecycle of a withdrawal. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Queued on L2, payout on L1 not yet observed
    Relayed,
    /// L1 payout observed
    Completed,
}

/// Bridge path of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalType {
    /// Paid out automatically
    Direct,
    /// Needs a separate claim on L1
    Claimable,
}

/// A withdrawal from L2 back to L1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    /// Withdrawal hash
    pub hash: B256,
    /// L1 recipient
    pub recipient: Address,
    /// Token registry index
    pub token_index: u32,
    /// Token standard
    pub token_type: TokenType,
    /// Withdrawn amount
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Bridge path
    #[serde(rename = "type")]
    pub kind: WithdrawalType,
    /// Lifecycle status
    pub status: WithdrawalStatus,
    /// L2 transaction that queued the withdrawal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayed_tx_hash: Option<B256>,
    /// Timestamp of the L2 block that queued the withdrawal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayed_timestamp: Option<u64>,
    /// L1 payout transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity_tx_hash: Option<B256>,
    /// Timestamp of the L1 payout block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity_timestamp: Option<u64>,
}

/// Status a block was observed to reach, with the fields decided along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPromotion {
    /// Block to promote
    pub hash: B256,
    /// New status
    pub status: BlockStatus,
    /// Decided validity
    pub block_validity: BlockValidity,
    /// Next account id; only present when the block was promoted from `Indexing`
    pub next_account_id: Option<u64>,
}

/// Fields finalization changes when a withdrawal's payout is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalCompletion {
    /// Withdrawal to complete
    #[serde(skip)]
    pub hash: B256,
    /// Always [`WithdrawalStatus::Completed`]
    pub status: WithdrawalStatus,
    /// L1 payout transaction
    pub liquidity_tx_hash: B256,
    /// Timestamp of the L1 payout block
    pub liquidity_timestamp: u64,
}

/// Filter over [`Block`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFilter {
    /// Only blocks with this status
    pub status: Option<BlockStatus>,
    /// Only blocks of this type
    pub block_type: Option<BlockType>,
    /// Only blocks with this validity
    pub block_validity: Option<BlockValidity>,
    /// Only the block with this number
    pub block_number: Option<u64>,
}

/// Filter over [`Deposit`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositFilter {
    /// Only deposits with this status
    pub status: Option<DepositStatus>,
    /// Only deposits of this token type
    pub token_type: Option<TokenType>,
    /// Only deposits from one of these senders
    pub senders: Option<Vec<Address>>,
    /// Only deposits made strictly before this L1 block
    pub before_block: Option<u64>,
}

/// Filter over [`Withdrawal`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithdrawalFilter {
    /// Only withdrawals with this status
    pub status: Option<WithdrawalStatus>,
    /// Only withdrawals of this token type
    pub token_type: Option<TokenType>,
    /// Only withdrawals of this bridge path
    pub kind: Option<WithdrawalType>,
}

impl Record for Block {
    fn key(&self) -> String {
        hash_key(&self.hash)
    }
}

impl Entity for Block {
    const KIND: &'static str = "blocks";
    const COLLECTION: &'static str = BLOCKS;
    const ORDER: OrderBy = OrderBy { field: "blockNumber", direction: Direction::Desc };
    type Filter = BlockFilter;

    fn conditions(filter: &BlockFilter) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(status) = filter.status {
            conditions.push(Condition::eq("status", status));
        }
        if let Some(block_type) = filter.block_type {
            conditions.push(Condition::eq("blockType", block_type));
        }
        if let Some(validity) = filter.block_validity {
            conditions.push(Condition::eq("blockValidity", validity));
        }
        if let Some(number) = filter.block_number {
            conditions.push(Condition::eq("blockNumber", number));
        }
        conditions
    }
}

impl Record for Deposit {
    fn key(&self) -> String {
        hash_key(&self.hash)
    }
}

impl Entity for Deposit {
    const KIND: &'static str = "deposits";
    const COLLECTION: &'static str = DEPOSITS;
    const ORDER: OrderBy = OrderBy { field: "depositId", direction: Direction::Desc };
    type Filter = DepositFilter;

    fn conditions(filter: &DepositFilter) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(status) = filter.status {
            conditions.push(Condition::eq("status", status));
        }
        if let Some(token_type) = filter.token_type {
            conditions.push(Condition::eq("tokenType", token_type));
        }
        if let Some(senders) = &filter.senders {
            conditions.push(Condition::is_in("sender", senders));
        }
        if let Some(block) = filter.before_block {
            conditions.push(Condition::lt("blockNumber", block));
        }
        conditions
    }
}

impl Record for Withdrawal {
    fn key(&self) -> String {
        hash_key(&self.hash)
    }
}

impl Entity for Withdrawal {
    const KIND: &'static str = "withdrawals";
    const COLLECTION: &'static str = WITHDRAWALS;
    const ORDER: OrderBy = OrderBy { field: "relayedTimestamp", direction: Direction::Desc };
    type Filter = WithdrawalFilter;

    fn conditions(filter: &WithdrawalFilter) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(status) = filter.status {
            conditions.push(Condition::eq("status", status));
        }
        if let Some(token_type) = filter.token_type {
            conditions.push(Condition::eq("tokenType", token_type));
        }
        if let Some(kind) = filter.kind {
            conditions.push(Condition::eq("type", kind));
        }
        conditions
    }
}

impl Record for WithdrawalCompletion {
    fn key(&self) -> String {
        hash_key(&self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_serializes_with_explorer_field_names() {
        let block = Block {
            hash: B256::repeat_byte(0xab),
            block_number: 100,
            status: BlockStatus::Indexing,
            block_validity: BlockValidity::Pending,
            block_type: BlockType::Registration,
            transaction_count: 3,
            builder_address: Address::ZERO,
            timestamp: 1_700_000_000,
            rollup_tx_hash: B256::ZERO,
            tx_digest: B256::ZERO,
            aggregator_signature: vec![],
            next_account_id: None,
        };

        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["blockNumber"], json!(100));
        assert_eq!(value["status"], json!("Indexing"));
        assert_eq!(value["blockValidity"], json!("Pending"));
        assert_eq!(value["blockType"], json!("Registration"));
        assert_eq!(value["transactionCount"], json!(3));
        assert_eq!(value["hash"], json!(block.key()));
        assert!(value.get("nextAccountId").is_none());
    }

    #[test]
    fn withdrawal_amount_and_type_use_explorer_encoding() {
        let withdrawal = Withdrawal {
            hash: B256::repeat_byte(1),
            recipient: Address::repeat_byte(2),
            token_index: 0,
            token_type: TokenType::Native,
            amount: U256::from(10).pow(U256::from(30)),
            kind: WithdrawalType::Claimable,
            status: WithdrawalStatus::Relayed,
            relayed_tx_hash: Some(B256::repeat_byte(3)),
            relayed_timestamp: Some(42),
            liquidity_tx_hash: None,
            liquidity_timestamp: None,
        };

        let value = serde_json::to_value(&withdrawal).unwrap();
        assert_eq!(value["amount"], json!("1000000000000000000000000000000"));
        assert_eq!(value["type"], json!("claimable"));
        assert_eq!(value["tokenType"], json!(0));

        let back: Withdrawal = serde_json::from_value(value).unwrap();
        assert_eq!(back, withdrawal);
    }

    #[test]
    fn statuses_are_ordered_by_lifecycle() {
        assert!(BlockStatus::Indexing < BlockStatus::Proving);
        assert!(BlockStatus::Proving < BlockStatus::Completed);
        assert!(WithdrawalStatus::Relayed < WithdrawalStatus::Completed);
    }

    #[test]
    fn deposit_filter_builds_novelty_conditions() {
        let filter = DepositFilter {
            senders: Some(vec![Address::repeat_byte(1)]),
            before_block: Some(50),
            ..Default::default()
        };
        let conditions = Deposit::conditions(&filter);

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1], Condition::lt("blockNumber", 50u64));
    }
}
