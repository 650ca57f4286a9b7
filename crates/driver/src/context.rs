//! Services shared by the watcher and finalizer runs
use std::sync::Arc;

use config::Opts;
use extractor::{Contracts, Extractor};
use eyre::{Context, Result};
use primitives::Throttle;
use proof::{ProofClient, ProofSource};
use store::{MongoStore, Repositories};
use tracing::info;

/// Deployment blocks of the contracts, where a first scan of each category starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedBlocks {
    /// Rollup contract (L2)
    pub rollup: u64,
    /// Liquidity contract (L1)
    pub liquidity: u64,
    /// Withdrawal contract (L2)
    pub withdrawal: u64,
}

/// Handles constructed once at process start and passed to every run.
#[derive(Debug, Clone)]
pub struct Services {
    /// Entity repositories, cursors and stats
    pub repos: Repositories,
    /// Chain readers
    pub extractor: Extractor,
    /// Validity proof data
    pub proofs: Arc<dyn ProofSource>,
    /// Contract deployment blocks
    pub deployed: DeployedBlocks,
    /// Pacing of per-block proof requests
    pub proof_throttle: Throttle,
    /// Number of `Indexing` blocks the finalizer re-checks per run
    pub indexing_page_size: usize,
}

impl Services {
    /// Connect to the store, the chains and the proof service described by `opts`.
    pub async fn from_opts(opts: &Opts) -> Result<Self> {
        info!(database = %opts.store.database, "Connecting to document store");
        let store = MongoStore::connect(&opts.store.uri, &opts.store.database)
            .await
            .wrap_err("failed to connect to MongoDB")?;
        store.ensure_indexes().await?;

        let contracts = Contracts {
            rollup: opts.contracts.rollup_address,
            liquidity: opts.contracts.liquidity_address,
            withdrawal: opts.contracts.withdrawal_address,
            multicall: opts.contracts.multicall_address,
        };
        let extractor = Extractor::from_urls(
            opts.rpc.l1_url.clone(),
            opts.rpc.l2_url.clone(),
            contracts,
            opts.throttle.log_block_range,
            Throttle::new(opts.throttle.timestamp_batch_size, opts.throttle.timestamp_sleep_time()),
        );

        let proofs =
            ProofClient::new(opts.proof_service.url.clone(), opts.proof_service.timeout())?;

        Ok(Self {
            repos: Repositories::new(Arc::new(store)),
            extractor,
            proofs: Arc::new(proofs),
            deployed: DeployedBlocks {
                rollup: opts.contracts.rollup_deployed_block,
                liquidity: opts.contracts.liquidity_deployed_block,
                withdrawal: opts.contracts.withdrawal_deployed_block,
            },
            proof_throttle: Throttle::new(
                opts.proof_service.block_batch_size,
                opts.proof_service.sleep_time(),
            ),
            indexing_page_size: opts.throttle.indexing_page_size,
        })
    }
}
