//! Withdrawal contract (L2): withdrawals queued for relay to L1.
use alloy::{primitives::Address, rpc::types::Filter, sol, sol_types::SolEvent};

use IWithdrawal::{ClaimableWithdrawalQueued, DirectWithdrawalQueued};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IWithdrawal {
        #[derive(Default)]
        struct Withdrawal {
            address recipient;
            uint32 tokenIndex;
            uint256 amount;
            bytes32 nullifier;
        }

        #[derive(Default)]
        event DirectWithdrawalQueued(
            bytes32 indexed withdrawalHash,
            address indexed recipient,
            Withdrawal withdrawal
        );

        #[derive(Default)]
        event ClaimableWithdrawalQueued(
            bytes32 indexed withdrawalHash,
            address indexed recipient,
            Withdrawal withdrawal
        );
    }
}

/// Returns a log [`Filter`] for `DirectWithdrawalQueued` events.
pub fn direct_withdrawal_queued_filter(address: Address) -> Filter {
    Filter::new().address(address).event_signature(DirectWithdrawalQueued::SIGNATURE_HASH)
}

/// Returns a log [`Filter`] for `ClaimableWithdrawalQueued` events.
pub fn claimable_withdrawal_queued_filter(address: Address) -> Filter {
    Filter::new().address(address).event_signature(ClaimableWithdrawalQueued::SIGNATURE_HASH)
}
