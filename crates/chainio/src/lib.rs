//! `ChainIO` holds the bindings of the rollup, liquidity, withdrawal and multicall
//! contracts, plus helpers that interpret their events and calldata.
pub mod liquidity;
pub mod multicall;
pub mod rollup;
pub mod withdrawal;

use alloy::providers::{RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers};
use serde::{Deserialize, Serialize};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

/// Token standard of an asset registered with the liquidity contract.
///
/// Stored as its on-chain discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TokenType {
    /// The chain's native asset
    Native,
    /// ERC-20 fungible token
    Erc20,
    /// ERC-721 non-fungible token
    Erc721,
    /// ERC-1155 multi token
    Erc1155,
}

impl TryFrom<u8> for TokenType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Native),
            1 => Ok(Self::Erc20),
            2 => Ok(Self::Erc721),
            3 => Ok(Self::Erc1155),
            other => Err(format!("unknown token type {other}")),
        }
    }
}

impl From<TokenType> for u8 {
    fn from(value: TokenType) -> Self {
        match value {
            TokenType::Native => 0,
            TokenType::Erc20 => 1,
            TokenType::Erc721 => 2,
            TokenType::Erc1155 => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TokenType;

    #[test]
    fn token_type_serializes_as_discriminant() {
        assert_eq!(serde_json::to_value(TokenType::Erc721).unwrap(), serde_json::json!(2));
        let parsed: TokenType = serde_json::from_value(serde_json::json!(0)).unwrap();
        assert_eq!(parsed, TokenType::Native);
        assert!(serde_json::from_value::<TokenType>(serde_json::json!(7)).is_err());
    }
}
