//! Liquidity contract (L1): deposits, withdrawal payouts and token registry reads.
use alloy::{
    primitives::{Address, B256},
    rpc::types::Filter,
    sol,
    sol_types::SolEvent,
};

use ILiquidity::{Deposited, DirectWithdrawalSuccessed, WithdrawalClaimable};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface ILiquidity {
        #[derive(Default)]
        event Deposited(
            uint256 indexed depositId,
            address indexed sender,
            bytes32 indexed recipientSaltHash,
            uint32 tokenIndex,
            uint256 amount,
            uint256 depositedAt
        );

        #[derive(Default)]
        event DirectWithdrawalSuccessed(bytes32 indexed withdrawalHash, address indexed recipient);

        #[derive(Default)]
        event WithdrawalClaimable(bytes32 indexed withdrawalHash);

        #[derive(Default, PartialEq, Eq)]
        struct TokenInfo {
            uint8 tokenType;
            address tokenAddress;
            uint256 tokenId;
        }

        #[derive(Default, PartialEq, Eq)]
        struct DepositData {
            bytes32 depositHash;
            address sender;
            bool isRejected;
        }

        /// @notice Returns the registry entry of a token index.
        function getTokenInfo(uint32 tokenIndex) external view returns (TokenInfo memory);

        /// @notice Returns the stored data of each deposit id, in order.
        function getDepositDataBatch(uint256[] calldata depositIds)
            external
            view
            returns (DepositData[] memory);
    }
}

/// Returns a log [`Filter`] for `Deposited` events.
pub fn deposited_filter(address: Address) -> Filter {
    Filter::new().address(address).event_signature(Deposited::SIGNATURE_HASH)
}

/// Returns a log [`Filter`] for `DirectWithdrawalSuccessed` events of the given withdrawal
/// hashes.
pub fn direct_withdrawal_succeeded_filter(address: Address, hashes: Vec<B256>) -> Filter {
    Filter::new()
        .address(address)
        .event_signature(DirectWithdrawalSuccessed::SIGNATURE_HASH)
        .topic1(hashes)
}

/// Returns a log [`Filter`] for `WithdrawalClaimable` events of the given withdrawal hashes.
pub fn withdrawal_claimable_filter(address: Address, hashes: Vec<B256>) -> Filter {
    Filter::new()
        .address(address)
        .event_signature(WithdrawalClaimable::SIGNATURE_HASH)
        .topic1(hashes)
}

impl Deposited {
    /// Deposit id as a plain integer.
    pub fn deposit_id(&self) -> u64 {
        self.depositId.saturating_to()
    }

    /// Timestamp the deposit was accepted at, in seconds.
    pub fn deposited_at(&self) -> u64 {
        self.depositedAt.saturating_to()
    }
}
