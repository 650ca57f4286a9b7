use std::collections::{BTreeSet, HashMap};

use alloy::{
    primitives::{Address, U256},
    sol_types::SolCall,
};
use chainio::{
    TokenType,
    liquidity::ILiquidity::getTokenInfoCall,
    multicall::IMulticall3::{Call3, aggregate3Call},
};
use eyre::{Context, Result, bail, eyre};
use tracing::debug;

use crate::ChainClient;

/// Registry entry of a token index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMetadata {
    /// Token standard
    pub token_type: TokenType,
    /// Token contract; zero for the native asset
    pub token_address: Address,
    /// Token id, for non-fungible standards
    pub token_id: U256,
}

/// Resolve the registry entries of `indexes` with a single Multicall3 `aggregate3` call.
///
/// Indexes are deduplicated. If the lookup of any index fails the whole resolution fails.
pub async fn resolve_token_metadata(
    client: &dyn ChainClient,
    multicall: Address,
    liquidity: Address,
    indexes: impl IntoIterator<Item = u32>,
) -> Result<HashMap<u32, TokenMetadata>> {
    let unique: BTreeSet<u32> = indexes.into_iter().collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let calls = unique
        .iter()
        .map(|&index| Call3 {
            target: liquidity,
            allowFailure: true,
            callData: getTokenInfoCall { tokenIndex: index }.abi_encode().into(),
        })
        .collect();
    let output = client
        .call(multicall, aggregate3Call { calls }.abi_encode().into(), None)
        .await
        .wrap_err("token info multicall failed")?;
    let results = aggregate3Call::abi_decode_returns(&output)?;
    if results.len() != unique.len() {
        bail!("multicall returned {} results for {} token indexes", results.len(), unique.len());
    }

    let mut metadata = HashMap::with_capacity(unique.len());
    for (index, result) in unique.into_iter().zip(results) {
        if !result.success {
            bail!("token info lookup failed for token index {index}");
        }
        let info = getTokenInfoCall::abi_decode_returns(&result.returnData)
            .wrap_err_with(|| format!("malformed token info for token index {index}"))?;
        let token_type = TokenType::try_from(info.tokenType).map_err(|e| eyre!(e))?;
        metadata.insert(
            index,
            TokenMetadata { token_type, token_address: info.tokenAddress, token_id: info.tokenId },
        );
    }

    debug!(count = metadata.len(), "Resolved token metadata");
    Ok(metadata)
}
