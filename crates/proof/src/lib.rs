//! Client of the validity prover service: per-block validity public inputs and the latest
//! proven block number.
use std::{fmt, time::Duration};

use alloy_primitives::B256;
use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

/// Public state committed by a block's validity proof.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicState {
    /// Proven block number
    pub block_number: u64,
    /// Proven block hash
    #[serde(default)]
    pub block_hash: Option<B256>,
    /// Next account id to be assigned after this block
    pub next_account_id: u64,
}

/// Validity public inputs of one block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityPis {
    /// Public state after the block
    pub public_state: PublicState,
    /// Whether the block was found valid
    pub is_valid_block: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestProven {
    block_number: u64,
}

/// The proof data the pipelines depend on.
#[async_trait]
pub trait ProofSource: Send + Sync + fmt::Debug {
    /// Validity public inputs of `block_number`, `None` while the block is not yet proven.
    async fn validity_pis(&self, block_number: u64) -> Result<Option<ValidityPis>>;

    /// Highest block number covered by a validity proof.
    async fn latest_proven_block_number(&self) -> Result<u64>;
}

/// HTTP client of the validity prover API. Requests are never retried.
#[derive(Debug, Clone)]
pub struct ProofClient {
    http: HttpClient,
    base_url: Url,
}

impl ProofClient {
    /// Create a client for the API at `base_url`, with a per-request `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build validity prover HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl ProofSource for ProofClient {
    async fn validity_pis(&self, block_number: u64) -> Result<Option<ValidityPis>> {
        let resp = self
            .http
            .get(self.endpoint("get-validity-pis"))
            .query(&[("blockNumber", block_number)])
            .send()
            .await
            .wrap_err_with(|| format!("failed to fetch validity pis of block {block_number}"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(block_number, "Validity pis not yet available");
            return Ok(None);
        }

        let pis = resp
            .error_for_status()
            .wrap_err_with(|| format!("failed to fetch validity pis of block {block_number}"))?
            .json::<Option<ValidityPis>>()
            .await
            .wrap_err_with(|| format!("malformed validity pis of block {block_number}"))?;
        Ok(pis)
    }

    async fn latest_proven_block_number(&self) -> Result<u64> {
        let latest = self
            .http
            .get(self.endpoint("validity-proof-block-number"))
            .send()
            .await?
            .error_for_status()?
            .json::<LatestProven>()
            .await
            .wrap_err("failed to fetch latest validity proof block number")?;
        Ok(latest.block_number)
    }
}
