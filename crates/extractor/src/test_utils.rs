//! In-memory [`ChainClient`] for tests.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::{
    primitives::{Address, B256, Bytes, Log as PrimitiveLog, U256},
    rpc::types::{Filter, Log},
    sol_types::{SolCall, SolEvent},
};
use async_trait::async_trait;
use chainio::{
    liquidity::ILiquidity::{DepositData, TokenInfo, getDepositDataBatchCall, getTokenInfoCall},
    multicall::IMulticall3::{Call3Result, aggregate3Call},
};
use eyre::{Result, bail, eyre};

use crate::ChainClient;

#[derive(Debug, Default)]
struct State {
    head: u64,
    logs: Vec<Log>,
    transactions: HashMap<B256, Bytes>,
    timestamps: HashMap<u64, u64>,
    tokens: HashMap<u32, TokenInfo>,
    deposits: HashMap<u64, DepositData>,
    log_queries: Vec<(u64, u64)>,
    calls: usize,
}

/// A scripted chain: logs, transactions, block timestamps, token registry and deposit data.
///
/// `eth_call` understands Multicall3 `aggregate3` over `getTokenInfo`, and
/// `getDepositDataBatch`.
#[derive(Debug, Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl MockChain {
    /// Create an empty chain at head 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the chain head.
    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Emit `event` from `address` in block `block_number`, by transaction `tx_hash`.
    pub fn push_event<E: SolEvent>(
        &self,
        address: Address,
        event: &E,
        block_number: u64,
        tx_hash: B256,
    ) {
        let mut state = self.state();
        let inner = PrimitiveLog { address, data: event.encode_log_data() };
        let log_index = state.logs.len() as u64;
        state.logs.push(Log {
            inner,
            block_number: Some(block_number),
            transaction_hash: Some(tx_hash),
            log_index: Some(log_index),
            ..Default::default()
        });
    }

    /// Register the calldata of a transaction.
    pub fn set_transaction(&self, hash: B256, input: impl Into<Bytes>) {
        self.state().transactions.insert(hash, input.into());
    }

    /// Register the timestamp of a block.
    pub fn set_block_timestamp(&self, number: u64, timestamp: u64) {
        self.state().timestamps.insert(number, timestamp);
    }

    /// Register a token registry entry.
    pub fn set_token(&self, index: u32, info: TokenInfo) {
        self.state().tokens.insert(index, info);
    }

    /// Register the stored data of a deposit id.
    pub fn set_deposit_data(&self, deposit_id: u64, data: DepositData) {
        self.state().deposits.insert(deposit_id, data);
    }

    /// Block windows of every `eth_getLogs` query so far.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state().log_queries.clone()
    }

    /// Number of `eth_call`s so far.
    pub fn call_count(&self) -> usize {
        self.state().calls
    }
}

fn matches(filter: &Filter, log: &Log) -> bool {
    let Some(number) = log.block_number else { return false };
    let from = filter.get_from_block().unwrap_or(0);
    let to = filter.get_to_block().unwrap_or(u64::MAX);

    (from..=to).contains(&number)
        && filter.address.matches(&log.address())
        && filter
            .topics
            .iter()
            .enumerate()
            .all(|(i, set)| log.topics().get(i).map_or(set.is_empty(), |topic| set.matches(topic)))
}

fn answer_multicall(state: &State, input: &[u8]) -> Result<Bytes> {
    let call = aggregate3Call::abi_decode(input)?;
    let results: Vec<Call3Result> = call
        .calls
        .iter()
        .map(|inner| {
            let info = getTokenInfoCall::abi_decode(&inner.callData)
                .ok()
                .and_then(|c| state.tokens.get(&c.tokenIndex));
            match info {
                Some(info) => Call3Result {
                    success: true,
                    returnData: getTokenInfoCall::abi_encode_returns(info).into(),
                },
                None => Call3Result { success: false, returnData: Bytes::new() },
            }
        })
        .collect();
    Ok(aggregate3Call::abi_encode_returns(&results).into())
}

fn answer_deposit_batch(state: &State, input: &[u8]) -> Result<Bytes> {
    let call = getDepositDataBatchCall::abi_decode(input)?;
    let data = call
        .depositIds
        .iter()
        .map(|id: &U256| {
            let id: u64 = id.saturating_to();
            state.deposits.get(&id).cloned().ok_or_else(|| eyre!("unknown deposit id {id}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(getDepositDataBatchCall::abi_encode_returns(&data).into())
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.state().head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let mut state = self.state();
        let window = (filter.get_from_block().unwrap_or(0), filter.get_to_block().unwrap_or(0));
        state.log_queries.push(window);
        Ok(state.logs.iter().filter(|log| matches(filter, log)).cloned().collect())
    }

    async fn transaction_input(&self, hash: B256) -> Result<Bytes> {
        let state = self.state();
        state.transactions.get(&hash).cloned().ok_or_else(|| eyre!("transaction {hash} not found"))
    }

    async fn call(&self, _to: Address, input: Bytes, _block: Option<u64>) -> Result<Bytes> {
        let mut state = self.state();
        state.calls += 1;
        match input.get(..4) {
            Some(selector) if selector == aggregate3Call::SELECTOR.as_slice() => {
                answer_multicall(&state, &input)
            }
            Some(selector) if selector == getDepositDataBatchCall::SELECTOR.as_slice() => {
                answer_deposit_batch(&state, &input)
            }
            _ => bail!("unsupported call"),
        }
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        Ok(self.state().timestamps.get(&number).copied())
    }
}
