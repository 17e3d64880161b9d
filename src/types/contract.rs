//! On-chain ledger contract bindings.

use alloy::sol;

sol! {
    /// The payout ledger contract. Verifies Merkle proofs, executes token
    /// payouts, and fans native gas out to relayer wallets.
    #[sol(rpc)]
    #[derive(Debug)]
    contract BatchLedger {
        /// Executes one payout leaf after verifying its inclusion proof.
        function executeTransaction(
            uint256 batchId,
            uint256 txId,
            address funder,
            address recipient,
            uint256 amount,
            bytes32[] calldata proof
        ) external;

        /// Whether a leaf has already been executed.
        function processedLeaves(bytes32 leaf) external view returns (bool);

        /// Sends `amountEach` native currency to every recipient in one
        /// transaction.
        function distributeMatic(address[] calldata recipients, uint256 amountEach)
            external
            payable;

        /// Registers a batch root on behalf of a funder.
        function setBatchRootWithSignature(
            address funder,
            uint256 batchId,
            bytes32 root,
            uint256 totalTxs,
            uint256 totalAmount,
            bytes calldata signature
        ) external;

        /// The registered root for a funder's batch.
        function batchRoots(address funder, uint256 batchId) external view returns (bytes32);

        /// Emitted once per executed leaf.
        event TransactionExecuted(
            uint256 indexed batchId,
            uint256 indexed txId,
            bytes32 indexed leaf,
            address recipient,
            uint256 amount
        );
    }

    /// Minimal ERC-20 surface used for funder preflight checks.
    #[sol(rpc)]
    #[derive(Debug)]
    contract PaymentToken {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}
