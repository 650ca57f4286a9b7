//! Multicall3 bindings, used to batch read-only calls into a single `eth_call`.
use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external
            payable
            returns (Call3Result[] memory returnData);
    }
}
