//! Explorer indexer configuration
use std::time::Duration;

use alloy_primitives::{Address, address};
use clap::Parser;
use url::Url;

/// Canonical Multicall3 deployment, identical on every EVM chain it is deployed to.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Document store configuration options
#[derive(Debug, Clone, Parser)]
pub struct StoreOpts {
    /// `MongoDB` connection string. Must point at a replica set, transactions depend on it.
    #[clap(long = "mongodb-uri", env = "MONGODB_URI")]
    pub uri: String,
    /// `MongoDB` database name
    #[clap(long = "mongodb-database", env = "MONGODB_DATABASE", default_value = "explorer")]
    pub database: String,
}

/// RPC endpoint configuration options
#[derive(Debug, Clone, Parser)]
pub struct RpcOpts {
    /// L1 RPC URL (HTTP)
    #[clap(long, env = "L1_RPC_URL")]
    pub l1_url: Url,
    /// L2 RPC URL (HTTP)
    #[clap(long, env = "L2_RPC_URL")]
    pub l2_url: Url,
}

/// Contract address configuration options
#[derive(Debug, Clone, Parser)]
pub struct ContractOpts {
    /// Rollup contract address on L2
    #[clap(long, env = "ROLLUP_CONTRACT_ADDRESS")]
    pub rollup_address: Address,
    /// L2 block the rollup contract was deployed at
    #[clap(long, env = "ROLLUP_CONTRACT_DEPLOYED_BLOCK")]
    pub rollup_deployed_block: u64,
    /// Liquidity contract address on L1
    #[clap(long, env = "LIQUIDITY_CONTRACT_ADDRESS")]
    pub liquidity_address: Address,
    /// L1 block the liquidity contract was deployed at
    #[clap(long, env = "LIQUIDITY_CONTRACT_DEPLOYED_BLOCK")]
    pub liquidity_deployed_block: u64,
    /// Withdrawal contract address on L2
    #[clap(long, env = "WITHDRAWAL_CONTRACT_ADDRESS")]
    pub withdrawal_address: Address,
    /// L2 block the withdrawal contract was deployed at
    #[clap(long, env = "WITHDRAWAL_CONTRACT_DEPLOYED_BLOCK")]
    pub withdrawal_deployed_block: u64,
    /// Multicall3 address on L1, used for token metadata lookups
    #[clap(long, env = "MULTICALL3_ADDRESS", default_value_t = MULTICALL3_ADDRESS)]
    pub multicall_address: Address,
}

/// Validity prover API configuration options
#[derive(Debug, Clone, Parser)]
pub struct ProofServiceOpts {
    /// Base URL of the validity prover API
    #[clap(long = "validity-prover-api-url", env = "VALIDITY_PROVER_API_URL")]
    pub url: Url,
    /// Request timeout in seconds
    #[clap(
        long = "validity-prover-api-timeout-secs",
        env = "VALIDITY_PROVER_API_TIMEOUT_SECS",
        default_value = "30"
    )]
    pub timeout_secs: u64,
    /// Number of blocks whose proofs are requested concurrently before pausing
    #[clap(
        long = "validity-prover-api-block-batch-size",
        env = "VALIDITY_PROVER_API_BLOCK_BATCH_SIZE",
        default_value = "15"
    )]
    pub block_batch_size: usize,
    /// Pause between two proof batches, in milliseconds
    #[clap(
        long = "validity-prover-api-sleep-time-ms",
        env = "VALIDITY_PROVER_API_SLEEP_TIME_MS",
        default_value = "1000"
    )]
    pub sleep_time_ms: u64,
}

impl ProofServiceOpts {
    /// Request timeout as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Pause between two proof batches as a [`Duration`].
    pub const fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }
}

/// Client-side throttling and scan sizing options
#[derive(Debug, Clone, Parser)]
pub struct ThrottleOpts {
    /// Number of block timestamps resolved concurrently before pausing
    #[clap(long, env = "BLOCK_TIMESTAMP_BATCH_SIZE", default_value = "100")]
    pub timestamp_batch_size: usize,
    /// Pause between two timestamp batches, in milliseconds
    #[clap(long, env = "BLOCK_TIMESTAMP_SLEEP_TIME_MS", default_value = "1000")]
    pub timestamp_sleep_time_ms: u64,
    /// Width of a single `eth_getLogs` sub-range, in blocks
    #[clap(long, env = "LOG_BLOCK_RANGE", default_value = "1000")]
    pub log_block_range: u64,
    /// Number of `Indexing` blocks the finalizer re-checks per run
    #[clap(long, env = "INDEXING_BLOCK_PAGE_SIZE", default_value = "500")]
    pub indexing_page_size: usize,
}

impl ThrottleOpts {
    /// Pause between two timestamp batches as a [`Duration`].
    pub const fn timestamp_sleep_time(&self) -> Duration {
        Duration::from_millis(self.timestamp_sleep_time_ms)
    }
}

/// CLI options shared by the watcher and finalizer binaries
#[derive(Debug, Clone, Parser)]
pub struct Opts {
    /// Document store configuration
    #[clap(flatten)]
    pub store: StoreOpts,

    /// RPC endpoint configuration
    #[clap(flatten)]
    pub rpc: RpcOpts,

    /// Contract address configuration
    #[clap(flatten)]
    pub contracts: ContractOpts,

    /// Validity prover API configuration
    #[clap(flatten)]
    pub proof_service: ProofServiceOpts,

    /// Throttling configuration
    #[clap(flatten)]
    pub throttle: ThrottleOpts,

    /// If set, repeat the job on this interval instead of running it once and exiting
    #[clap(long, env = "JOB_INTERVAL_SECS")]
    pub job_interval_secs: Option<u64>,
}

impl Opts {
    /// The job repeat interval, if the process should keep running.
    pub fn job_interval(&self) -> Option<Duration> {
        self.job_interval_secs.map(Duration::from_secs)
    }
}
