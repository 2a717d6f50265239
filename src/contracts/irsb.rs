use ethers::prelude::*;

// Inference Receipt Settlement Board ABI. `lookup` drives the idempotency
// check before submission; `recordReceipt` assigns the ledger-side id.
abigen!(
    Irsb,
    r#"[
        function recordReceipt(bytes32 requestId, bytes32 paymentHash, bytes32 resultHash, string endpoint, uint256 priceWei, string asset, uint256 issuedAt, bytes attestation) returns (uint256)
        function lookup(bytes32 requestId) view returns (uint256, uint256, bool)
    ]"#
);
