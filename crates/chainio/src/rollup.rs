//! Rollup contract (L2): block submissions and the `BlockPosted` event.
use alloy::{
    primitives::{Address, B256, keccak256},
    rpc::types::Filter,
    sol,
    sol_types::{SolEvent, SolInterface},
};

use IRollup::{BlockPosted, IRollupCalls};

/// Bytes of one packed account id in a non-registration submission.
pub const ACCOUNT_ID_BYTES: usize = 5;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IRollup {
        #[derive(Default)]
        event BlockPosted(
            bytes32 indexed prevBlockHash,
            address indexed blockBuilder,
            uint64 timestamp,
            uint256 blockNumber,
            bytes32 depositTreeRoot,
            bytes32 signatureHash
        );

        /// @notice Posts a block whose senders register their public keys with it.
        function postRegistrationBlock(
            bytes32 txTreeRoot,
            uint64 expiry,
            uint32 builderNonce,
            bytes16 senderFlags,
            bytes32[2] calldata aggregatedPublicKey,
            bytes32[4] calldata aggregatedSignature,
            bytes32[4] calldata messagePoint,
            uint256[] calldata senderPublicKeys
        ) external payable;

        /// @notice Posts a block whose senders are already registered, referenced by account id.
        function postNonRegistrationBlock(
            bytes32 txTreeRoot,
            uint64 expiry,
            uint32 builderNonce,
            bytes16 senderFlags,
            bytes32[2] calldata aggregatedPublicKey,
            bytes32[4] calldata aggregatedSignature,
            bytes32[4] calldata messagePoint,
            bytes32 publicKeysHash,
            bytes calldata senderAccountIds
        ) external payable;
    }
}

/// Returns a log [`Filter`] for `BlockPosted` events emitted by the rollup at `address`.
pub fn block_posted_filter(address: Address) -> Filter {
    Filter::new().address(address).event_signature(BlockPosted::SIGNATURE_HASH)
}

impl BlockPosted {
    /// Rollup block number carried by the event.
    pub fn block_number(&self) -> u64 {
        self.blockNumber.saturating_to()
    }

    /// Canonical block hash: `keccak256(prevBlockHash ‖ depositTreeRoot ‖ signatureHash ‖
    /// uint32(blockNumber))`, tightly packed.
    pub fn block_hash(&self) -> B256 {
        let number: u32 = self.blockNumber.saturating_to();

        let mut packed = Vec::with_capacity(3 * 32 + 4);
        packed.extend_from_slice(self.prevBlockHash.as_slice());
        packed.extend_from_slice(self.depositTreeRoot.as_slice());
        packed.extend_from_slice(self.signatureHash.as_slice());
        packed.extend_from_slice(&number.to_be_bytes());

        keccak256(packed)
    }
}

/// Account registration mode of a block submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    /// `postRegistrationBlock`
    Registration,
    /// `postNonRegistrationBlock`
    NonRegistration,
}

/// Transaction-batch fields of the L2 transaction that posted a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSubmission {
    /// Which post function was called
    pub kind: SubmissionKind,
    /// Root of the transaction tree
    pub tx_tree_root: B256,
    /// Aggregated BLS signature words
    pub aggregated_signature: Vec<B256>,
    /// Number of transactions in the batch
    pub transaction_count: u64,
}

/// Decode the calldata of a block submission.
///
/// Registration submissions carry one public key per sender. Non-registration submissions
/// carry account ids packed [`ACCOUNT_ID_BYTES`] bytes each.
pub fn decode_block_submission(input: &[u8]) -> alloy::sol_types::Result<BlockSubmission> {
    let submission = match IRollupCalls::abi_decode(input)? {
        IRollupCalls::postRegistrationBlock(call) => BlockSubmission {
            kind: SubmissionKind::Registration,
            tx_tree_root: call.txTreeRoot,
            aggregated_signature: call.aggregatedSignature.to_vec(),
            transaction_count: call.senderPublicKeys.len() as u64,
        },
        IRollupCalls::postNonRegistrationBlock(call) => BlockSubmission {
            kind: SubmissionKind::NonRegistration,
            tx_tree_root: call.txTreeRoot,
            aggregated_signature: call.aggregatedSignature.to_vec(),
            transaction_count: (call.senderAccountIds.len() / ACCOUNT_ID_BYTES) as u64,
        },
    };
    Ok(submission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{primitives::U256, sol_types::SolCall};

    fn event(block_number: u64) -> BlockPosted {
        BlockPosted {
            prevBlockHash: B256::repeat_byte(1),
            blockBuilder: Address::repeat_byte(2),
            timestamp: 1_700_000_000,
            blockNumber: U256::from(block_number),
            depositTreeRoot: B256::repeat_byte(3),
            signatureHash: B256::repeat_byte(4),
        }
    }

    #[test]
    fn block_hash_uses_packed_u32_block_number() {
        let posted = event(100);

        let mut expected = Vec::new();
        expected.extend_from_slice(&[1u8; 32]);
        expected.extend_from_slice(&[3u8; 32]);
        expected.extend_from_slice(&[4u8; 32]);
        expected.extend_from_slice(&[0, 0, 0, 100]);

        assert_eq!(expected.len(), 100);
        assert_eq!(posted.block_hash(), keccak256(expected));
    }

    #[test]
    fn block_hash_depends_on_block_number() {
        assert_ne!(event(1).block_hash(), event(2).block_hash());
        assert_eq!(event(7).block_hash(), event(7).block_hash());
    }

    #[test]
    fn decodes_registration_submission() {
        let call = IRollup::postRegistrationBlockCall {
            txTreeRoot: B256::repeat_byte(7),
            expiry: 0,
            builderNonce: 1,
            senderFlags: Default::default(),
            aggregatedPublicKey: [B256::ZERO; 2],
            aggregatedSignature: [B256::repeat_byte(9); 4],
            messagePoint: [B256::ZERO; 4],
            senderPublicKeys: vec![U256::from(1), U256::from(2), U256::from(3)],
        };

        let submission = decode_block_submission(&call.abi_encode()).unwrap();
        assert_eq!(submission.kind, SubmissionKind::Registration);
        assert_eq!(submission.transaction_count, 3);
        assert_eq!(submission.tx_tree_root, B256::repeat_byte(7));
        assert_eq!(submission.aggregated_signature, vec![B256::repeat_byte(9); 4]);
    }

    #[test]
    fn non_registration_count_follows_packed_account_ids() {
        let call = IRollup::postNonRegistrationBlockCall {
            txTreeRoot: B256::ZERO,
            expiry: 0,
            builderNonce: 0,
            senderFlags: Default::default(),
            aggregatedPublicKey: [B256::ZERO; 2],
            aggregatedSignature: [B256::ZERO; 4],
            messagePoint: [B256::ZERO; 4],
            publicKeysHash: B256::ZERO,
            senderAccountIds: vec![0u8; 4 * ACCOUNT_ID_BYTES].into(),
        };

        let submission = decode_block_submission(&call.abi_encode()).unwrap();
        assert_eq!(submission.kind, SubmissionKind::NonRegistration);
        assert_eq!(submission.transaction_count, 4);
    }

    #[test]
    fn rejects_unknown_calldata() {
        assert!(decode_block_submission(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn filter_targets_block_posted() {
        let filter = block_posted_filter(Address::repeat_byte(9));
        assert!(filter.address.matches(&Address::repeat_byte(9)));
        assert!(filter.topics[0].matches(&BlockPosted::SIGNATURE_HASH));
    }
}
