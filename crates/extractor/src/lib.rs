//! Chain readers of the explorer indexer: log scanning, calldata decoding, token registry and
//! deposit lookups, and throttled block timestamp resolution.
use std::{collections::HashMap, sync::Arc};

use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolCall,
};
use chainio::{
    liquidity::{
        self,
        ILiquidity::{
            Deposited, DepositData, DirectWithdrawalSuccessed, WithdrawalClaimable,
            getDepositDataBatchCall,
        },
    },
    rollup::{self, BlockSubmission, IRollup::BlockPosted, decode_block_submission},
    withdrawal::{
        self,
        IWithdrawal::{ClaimableWithdrawalQueued, DirectWithdrawalQueued},
    },
};
use eyre::{Context, Result, bail};
use primitives::Throttle;
use tracing::{debug, info};
use url::Url;

mod client;
mod logs;
mod timestamps;
mod tokens;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use client::{ChainClient, RpcChainClient};
pub use logs::{EventLog, decode_logs, fetch_logs, split_range};
pub use timestamps::resolve_block_timestamps;
pub use tokens::{TokenMetadata, resolve_token_metadata};

/// Deposit ids per `getDepositDataBatch` call.
const DEPOSIT_DATA_CHUNK_SIZE: usize = 100;

/// Withdrawal hashes per payout log query.
const PAYOUT_HASH_CHUNK_SIZE: usize = 100;

/// Addresses of the contracts the indexer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contracts {
    /// Rollup contract (L2)
    pub rollup: Address,
    /// Liquidity contract (L1)
    pub liquidity: Address,
    /// Withdrawal contract (L2)
    pub withdrawal: Address,
    /// Multicall3 (L1)
    pub multicall: Address,
}

/// An L1 payout of a withdrawal, from either payout event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalPayout {
    /// Withdrawal hash
    pub withdrawal_hash: B256,
    /// L1 payout transaction
    pub tx_hash: B256,
    /// L1 payout block
    pub block_number: u64,
    /// L1 payout block timestamp, when the node includes it in log responses
    pub block_timestamp: Option<u64>,
}

/// Withdrawals queued on L2, by bridge path.
#[derive(Debug, Clone, Default)]
pub struct QueuedWithdrawals {
    /// `DirectWithdrawalQueued` events
    pub direct: Vec<EventLog<DirectWithdrawalQueued>>,
    /// `ClaimableWithdrawalQueued` events
    pub claimable: Vec<EventLog<ClaimableWithdrawalQueued>>,
}

impl QueuedWithdrawals {
    /// Total number of queued withdrawals.
    pub fn len(&self) -> usize {
        self.direct.len() + self.claimable.len()
    }

    /// Whether no withdrawal was queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extractor client over the L1 and L2 chains.
#[derive(Debug, Clone)]
pub struct Extractor {
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    contracts: Contracts,
    log_block_range: u64,
    timestamp_throttle: Throttle,
}

impl Extractor {
    /// Create a new extractor over arbitrary chain clients.
    pub fn new(
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        contracts: Contracts,
        log_block_range: u64,
        timestamp_throttle: Throttle,
    ) -> Self {
        Self { l1, l2, contracts, log_block_range, timestamp_throttle }
    }

    /// Create a new extractor over HTTP JSON-RPC endpoints.
    pub fn from_urls(
        l1_rpc_url: Url,
        l2_rpc_url: Url,
        contracts: Contracts,
        log_block_range: u64,
        timestamp_throttle: Throttle,
    ) -> Self {
        info!(l1 = %l1_rpc_url, l2 = %l2_rpc_url, "Creating chain clients");
        Self::new(
            Arc::new(RpcChainClient::new(l1_rpc_url)),
            Arc::new(RpcChainClient::new(l2_rpc_url)),
            contracts,
            log_block_range,
            timestamp_throttle,
        )
    }

    /// Current L1 head.
    pub async fn l1_head(&self) -> Result<u64> {
        self.l1.block_number().await.wrap_err("failed to read L1 head")
    }

    /// Current L2 head.
    pub async fn l2_head(&self) -> Result<u64> {
        self.l2.block_number().await.wrap_err("failed to read L2 head")
    }

    /// `BlockPosted` events in L2 blocks `[start, end]`.
    pub async fn block_posted_events(&self, start: u64, end: u64) -> Result<Vec<EventLog<BlockPosted>>> {
        let filter = rollup::block_posted_filter(self.contracts.rollup);
        let logs = fetch_logs(self.l2.as_ref(), &filter, start, end, self.log_block_range).await?;
        decode_logs(&logs)
    }

    /// Decode the submission posted by L2 transaction `tx_hash`.
    pub async fn block_submission(&self, tx_hash: B256) -> Result<BlockSubmission> {
        let input = self.l2.transaction_input(tx_hash).await?;
        decode_block_submission(&input)
            .wrap_err_with(|| format!("failed to decode block submission {tx_hash}"))
    }

    /// `Deposited` events in L1 blocks `[start, end]`.
    pub async fn deposited_events(&self, start: u64, end: u64) -> Result<Vec<EventLog<Deposited>>> {
        let filter = liquidity::deposited_filter(self.contracts.liquidity);
        let logs = fetch_logs(self.l1.as_ref(), &filter, start, end, self.log_block_range).await?;
        decode_logs(&logs)
    }

    /// Stored data of `deposit_ids` as of L1 block `at_block`, in input order.
    pub async fn deposit_data(&self, deposit_ids: &[u64], at_block: u64) -> Result<Vec<DepositData>> {
        let mut data = Vec::with_capacity(deposit_ids.len());
        for chunk in deposit_ids.chunks(DEPOSIT_DATA_CHUNK_SIZE) {
            let call = getDepositDataBatchCall {
                depositIds: chunk.iter().map(|&id| U256::from(id)).collect(),
            };
            let output = self
                .l1
                .call(self.contracts.liquidity, call.abi_encode().into(), Some(at_block))
                .await
                .wrap_err("getDepositDataBatch call failed")?;
            let batch = getDepositDataBatchCall::abi_decode_returns(&output)?;
            if batch.len() != chunk.len() {
                bail!("getDepositDataBatch returned {} entries for {} ids", batch.len(), chunk.len());
            }
            data.extend(batch);
        }
        Ok(data)
    }

    /// Withdrawals queued in L2 blocks `[start, end]`.
    pub async fn queued_withdrawals(&self, start: u64, end: u64) -> Result<QueuedWithdrawals> {
        let address = self.contracts.withdrawal;
        let direct = withdrawal::direct_withdrawal_queued_filter(address);
        let claimable = withdrawal::claimable_withdrawal_queued_filter(address);

        let direct = fetch_logs(self.l2.as_ref(), &direct, start, end, self.log_block_range).await?;
        let claimable =
            fetch_logs(self.l2.as_ref(), &claimable, start, end, self.log_block_range).await?;

        Ok(QueuedWithdrawals { direct: decode_logs(&direct)?, claimable: decode_logs(&claimable)? })
    }

    /// L1 payouts of `hashes` in L1 blocks `[start, end]`, from both payout events.
    pub async fn withdrawal_payouts(
        &self,
        hashes: &[B256],
        start: u64,
        end: u64,
    ) -> Result<Vec<WithdrawalPayout>> {
        let address = self.contracts.liquidity;
        let mut payouts = Vec::new();

        for chunk in hashes.chunks(PAYOUT_HASH_CHUNK_SIZE) {
            let direct = liquidity::direct_withdrawal_succeeded_filter(address, chunk.to_vec());
            let logs = fetch_logs(self.l1.as_ref(), &direct, start, end, self.log_block_range).await?;
            payouts.extend(decode_logs::<DirectWithdrawalSuccessed>(&logs)?.into_iter().map(|log| {
                WithdrawalPayout {
                    withdrawal_hash: log.event.withdrawalHash,
                    tx_hash: log.tx_hash,
                    block_number: log.block_number,
                    block_timestamp: log.block_timestamp,
                }
            }));

            let claimable = liquidity::withdrawal_claimable_filter(address, chunk.to_vec());
            let logs =
                fetch_logs(self.l1.as_ref(), &claimable, start, end, self.log_block_range).await?;
            payouts.extend(decode_logs::<WithdrawalClaimable>(&logs)?.into_iter().map(|log| {
                WithdrawalPayout {
                    withdrawal_hash: log.event.withdrawalHash,
                    tx_hash: log.tx_hash,
                    block_number: log.block_number,
                    block_timestamp: log.block_timestamp,
                }
            }));
        }

        debug!(hashes = hashes.len(), payouts = payouts.len(), start, end, "Fetched withdrawal payouts");
        Ok(payouts)
    }

    /// Token registry entries of `indexes`.
    pub async fn token_metadata(
        &self,
        indexes: impl IntoIterator<Item = u32>,
    ) -> Result<HashMap<u32, TokenMetadata>> {
        resolve_token_metadata(
            self.l1.as_ref(),
            self.contracts.multicall,
            self.contracts.liquidity,
            indexes,
        )
        .await
    }

    /// Timestamps of L1 blocks.
    pub async fn l1_block_timestamps(
        &self,
        numbers: impl IntoIterator<Item = u64>,
    ) -> Result<HashMap<u64, u64>> {
        resolve_block_timestamps(self.l1.as_ref(), &self.timestamp_throttle, numbers).await
    }

    /// Timestamps of L2 blocks.
    pub async fn l2_block_timestamps(
        &self,
        numbers: impl IntoIterator<Item = u64>,
    ) -> Result<HashMap<u64, u64>> {
        resolve_block_timestamps(self.l2.as_ref(), &self.timestamp_throttle, numbers).await
    }
}
