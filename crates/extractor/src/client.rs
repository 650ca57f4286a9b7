use std::fmt;

use alloy::{
    primitives::{Address, B256, Bytes},
    providers::{Provider, ProviderBuilder},
    rpc::types::{Filter, Log, TransactionRequest},
};
use alloy_consensus::Transaction as _;
use alloy_rpc_client::ClientBuilder;
use alloy_rpc_types_eth::{BlockId, BlockNumberOrTag};
use async_trait::async_trait;
use chainio::DefaultProvider;
use derive_more::Debug;
use eyre::{Context, Result, eyre};
use primitives::retries::DEFAULT_RETRY_LAYER;
use url::Url;

/// The JSON-RPC surface the chain readers depend on.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64>;

    /// Logs matching `filter`. The filter always carries an explicit block range.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Calldata of a mined transaction.
    async fn transaction_input(&self, hash: B256) -> Result<Bytes>;

    /// `eth_call` against `to`, at `block` or at the head.
    async fn call(&self, to: Address, input: Bytes, block: Option<u64>) -> Result<Bytes>;

    /// Timestamp of a block, `None` if the node does not know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>>;
}

/// [`ChainClient`] over an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    #[debug(skip)]
    provider: DefaultProvider,
    url: Url,
}

impl RpcChainClient {
    /// Create a client for `url` with the default retry layer.
    pub fn new(url: Url) -> Self {
        let client = ClientBuilder::default().layer(DEFAULT_RETRY_LAYER).http(url.clone());
        let provider = ProviderBuilder::new().connect_client(client);
        Self { provider, url }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("failed to get block number from {}", self.url))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn transaction_input(&self, hash: B256) -> Result<Bytes> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await?
            .ok_or_else(|| eyre!("transaction {hash} not found"))?;
        Ok(tx.input().clone())
    }

    async fn call(&self, to: Address, input: Bytes, block: Option<u64>) -> Result<Bytes> {
        let request = TransactionRequest::default().to(to).input(input.into());
        let block = block.map_or_else(BlockId::latest, BlockId::number);
        Ok(self.provider.call(request).block(block).await?)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let block = self.provider.get_block_by_number(BlockNumberOrTag::Number(number)).await?;
        Ok(block.map(|b| b.header.timestamp))
    }
}
