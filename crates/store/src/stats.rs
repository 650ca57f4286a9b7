//! Explorer-wide aggregate counters.
use std::sync::Arc;

use alloy_primitives::U256;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{document::DocumentStore, models::decimal, repository::decode};

/// Collection holding the single [`StatsSummary`] document.
pub const STATS: &str = "stats";
/// Key of the [`StatsSummary`] document.
pub const SUMMARY_KEY: &str = "summary";

/// Aggregate counters shown by the explorer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSummary {
    /// Highest rollup block number ingested
    pub latest_block_number: u64,
    /// Transactions in valid blocks
    pub total_transaction_count: u64,
    /// Distinct L1 depositors
    pub total_l1_wallet_count: u64,
    /// Highest `nextAccountId` observed; account ids are sequential
    pub total_l2_wallet_count: u64,
    /// Sum of accepted native-token deposits, in wei
    #[serde(with = "decimal")]
    pub total_eth_deposit_amount: U256,
}

/// Contribution of one run to the [`StatsSummary`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsDelta {
    /// Highest block number seen by the run
    pub latest_block_number: Option<u64>,
    /// Transactions to add
    pub transaction_count: u64,
    /// New L1 wallets to add
    pub l1_wallet_count: u64,
    /// Highest `nextAccountId` seen by the run
    pub l2_wallet_count: Option<u64>,
    /// Deposit amount to add
    pub eth_deposit_amount: U256,
}

impl StatsDelta {
    /// Whether applying the delta would leave any summary unchanged.
    pub fn is_empty(&self) -> bool {
        self.latest_block_number.is_none()
            && self.transaction_count == 0
            && self.l1_wallet_count == 0
            && self.l2_wallet_count.is_none()
            && self.eth_deposit_amount.is_zero()
    }
}

impl StatsSummary {
    /// Summary after `delta`: sums are added, maxima only ever grow.
    pub fn apply(&self, delta: &StatsDelta) -> Self {
        Self {
            latest_block_number: delta
                .latest_block_number
                .map_or(self.latest_block_number, |n| n.max(self.latest_block_number)),
            total_transaction_count: self
                .total_transaction_count
                .saturating_add(delta.transaction_count),
            total_l1_wallet_count: self.total_l1_wallet_count.saturating_add(delta.l1_wallet_count),
            total_l2_wallet_count: delta
                .l2_wallet_count
                .map_or(self.total_l2_wallet_count, |n| n.max(self.total_l2_wallet_count)),
            total_eth_deposit_amount: self
                .total_eth_deposit_amount
                .saturating_add(delta.eth_deposit_amount),
        }
    }
}

/// Read access to the [`StatsSummary`]. Written only through
/// [`crate::progress::commit_progress`].
#[derive(Debug, Clone)]
pub struct StatsStore {
    store: Arc<dyn DocumentStore>,
}

impl StatsStore {
    /// Create a new [`StatsStore`].
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Current summary; all-zero before the first write.
    pub async fn get(&self) -> Result<StatsSummary> {
        let document =
            self.store.get(STATS, SUMMARY_KEY).await.wrap_err("failed to read stats summary")?;
        Ok(document.map(decode).transpose()?.unwrap_or_default())
    }
}
