use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::EIP712Domain;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::models::attestation::eip712_digest;
use crate::models::u256_dec;

/// EIP-712 type string the payer signs over. Field order is part of the wire
/// contract; changing it invalidates every existing proof.
pub const AUTHORIZATION_TYPE: &str = "PaymentAuthorization(address payer,address payTo,uint256 amount,string asset,uint256 chainId,bytes32 nonce,uint256 validAfter,uint256 validBefore)";

/// Domain name the payment authorization is signed under.
pub const AUTHORIZATION_DOMAIN_NAME: &str = "ReceiptGatePayments";

/// A payer's transfer authorization, carried base64(JSON)-encoded in the
/// `X-Payment` header. The signature is an EIP-712 signature by `payer` over
/// the remaining fields; `valid_after`/`valid_before` bound replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub payer: Address,
    pub pay_to: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub asset: String,
    pub chain_id: u64,
    pub nonce: H256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub signature: String,
}

impl PaymentProof {
    /// The EIP-712 digest the payer signs. Both the client building the proof
    /// and the server verifying it derive this independently.
    pub fn authorization_hash(&self) -> H256 {
        let type_hash = keccak256(AUTHORIZATION_TYPE.as_bytes());
        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::Address(self.payer),
            Token::Address(self.pay_to),
            Token::Uint(self.amount),
            Token::FixedBytes(keccak256(self.asset.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
            Token::Uint(U256::from(self.valid_after)),
            Token::Uint(U256::from(self.valid_before)),
        ]));

        let domain = EIP712Domain {
            name: Some(AUTHORIZATION_DOMAIN_NAME.to_string()),
            version: Some("1".to_string()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: None,
            salt: None,
        };

        eip712_digest(domain.separator(), struct_hash)
    }

    /// Canonical digest of the proof's committed fields (signature excluded),
    /// used as the receipt's payment commitment. ABI word encoding keeps the
    /// layout stable across processes and implementations.
    pub fn digest(&self) -> H256 {
        let encoded = encode(&[
            Token::Address(self.payer),
            Token::Address(self.pay_to),
            Token::Uint(self.amount),
            Token::FixedBytes(keccak256(self.asset.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// A proof the gate has accepted, attached to the request context for the
/// receipt builder. Carries the digest so downstream stages never re-read the
/// raw header.
#[derive(Debug, Clone)]
pub struct ValidatedPayment {
    pub payer: Address,
    pub amount: U256,
    pub asset: String,
    pub chain_id: u64,
    pub nonce: H256,
    pub proof_digest: H256,
}

impl From<&PaymentProof> for ValidatedPayment {
    fn from(proof: &PaymentProof) -> Self {
        Self {
            payer: proof.payer,
            amount: proof.amount,
            asset: proof.asset.clone(),
            chain_id: proof.chain_id,
            nonce: proof.nonce,
            proof_digest: proof.digest(),
        }
    }
}
