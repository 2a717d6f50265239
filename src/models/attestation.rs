use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::EIP712Domain;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::models::u256_dec;
use crate::models::Receipt;

/// EIP-712 type string for receipt attestations. Pinned by the IRSB contract
/// interface; both parties must use it verbatim for signatures to line up.
pub const RECEIPT_TYPE: &str = "InferenceReceipt(bytes32 requestId,bytes32 paymentHash,string endpoint,bytes32 resultHash,uint256 price,string asset,uint256 timestamp)";

/// Domain parameters the receipt attestation is signed under.
#[derive(Debug, Clone)]
pub struct AttestationDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// Full typed-data document for a receipt, in the shape wallets accept for
/// `eth_signTypedData_v4`. Field and type ordering are fixed by these struct
/// declarations, so client and server derive byte-identical payloads from the
/// same receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SigningPayload {
    pub domain: PayloadDomain,
    pub types: PayloadTypes,
    pub primary_type: String,
    pub message: ReceiptMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadTypes {
    #[serde(rename = "EIP712Domain")]
    pub eip712_domain: Vec<TypeField>,
    #[serde(rename = "InferenceReceipt")]
    pub inference_receipt: Vec<TypeField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMessage {
    pub request_id: H256,
    pub payment_hash: H256,
    pub endpoint: String,
    pub result_hash: H256,
    #[serde(with = "u256_dec")]
    pub price: U256,
    pub asset: String,
    pub timestamp: u64,
}

impl SigningPayload {
    /// Derive the typed-data payload for a receipt. Deterministic: re-deriving
    /// from the same receipt yields byte-identical JSON regardless of which
    /// party constructs it.
    pub fn for_receipt(receipt: &Receipt, domain: &AttestationDomain) -> Self {
        Self {
            domain: PayloadDomain {
                name: domain.name.clone(),
                version: domain.version.clone(),
                chain_id: domain.chain_id,
                verifying_contract: domain.verifying_contract,
            },
            types: PayloadTypes {
                eip712_domain: vec![
                    TypeField::new("name", "string"),
                    TypeField::new("version", "string"),
                    TypeField::new("chainId", "uint256"),
                    TypeField::new("verifyingContract", "address"),
                ],
                inference_receipt: vec![
                    TypeField::new("requestId", "bytes32"),
                    TypeField::new("paymentHash", "bytes32"),
                    TypeField::new("endpoint", "string"),
                    TypeField::new("resultHash", "bytes32"),
                    TypeField::new("price", "uint256"),
                    TypeField::new("asset", "string"),
                    TypeField::new("timestamp", "uint256"),
                ],
            },
            primary_type: "InferenceReceipt".to_string(),
            message: ReceiptMessage {
                request_id: receipt.request_id,
                payment_hash: receipt.payment_hash,
                endpoint: receipt.endpoint.clone(),
                result_hash: receipt.result_hash,
                price: receipt.price_wei,
                asset: receipt.asset.clone(),
                timestamp: receipt.issued_at,
            },
        }
    }

    /// The 32-byte digest either party signs: keccak256(0x1901 || domain
    /// separator || struct hash). Computed from the payload's own fields so a
    /// client that received the payload can hash it without the receipt.
    pub fn signing_hash(&self) -> H256 {
        let type_hash = keccak256(RECEIPT_TYPE.as_bytes());
        let m = &self.message;
        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::FixedBytes(m.request_id.as_bytes().to_vec()),
            Token::FixedBytes(m.payment_hash.as_bytes().to_vec()),
            Token::FixedBytes(keccak256(m.endpoint.as_bytes()).to_vec()),
            Token::FixedBytes(m.result_hash.as_bytes().to_vec()),
            Token::Uint(m.price),
            Token::FixedBytes(keccak256(m.asset.as_bytes()).to_vec()),
            Token::Uint(U256::from(m.timestamp)),
        ]));

        let domain = EIP712Domain {
            name: Some(self.domain.name.clone()),
            version: Some(self.domain.version.clone()),
            chain_id: Some(U256::from(self.domain.chain_id)),
            verifying_contract: Some(self.domain.verifying_contract),
            salt: None,
        };

        eip712_digest(domain.separator(), struct_hash)
    }
}

impl TypeField {
    fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// keccak256(0x19 0x01 || domainSeparator || structHash)
pub(crate) fn eip712_digest(domain_separator: [u8; 32], struct_hash: [u8; 32]) -> H256 {
    let mut input = Vec::with_capacity(66);
    input.extend_from_slice(&[0x19, 0x01]);
    input.extend_from_slice(&domain_separator);
    input.extend_from_slice(&struct_hash);
    H256::from(keccak256(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceConfig;
    use crate::models::{GenerationResult, ValidatedPayment};
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::RecoveryMessage;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn domain() -> AttestationDomain {
        AttestationDomain {
            name: "InferenceReceiptSettlementBoard".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            verifying_contract: "0x4444444444444444444444444444444444444444"
                .parse()
                .unwrap(),
        }
    }

    fn receipt() -> Receipt {
        let payment = ValidatedPayment {
            payer: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            amount: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            nonce: H256::from_low_u64_be(1),
            proof_digest: H256::from_low_u64_be(77),
        };
        let result = GenerationResult {
            prompt: "hello".to_string(),
            output: "generated".to_string(),
            model: "sim-1".to_string(),
        };
        let price = PriceConfig {
            price_wei: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            pay_to: Address::zero(),
        };
        Receipt::issue(&payment, "/api/generate", &result, &price, 1700000000).unwrap()
    }

    #[test]
    fn independent_derivations_are_byte_identical() {
        let a = SigningPayload::for_receipt(&receipt(), &domain());
        let b = SigningPayload::for_receipt(&receipt(), &domain());
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
        assert_eq!(a.signing_hash(), b.signing_hash());
    }

    #[test]
    fn signing_hash_binds_domain() {
        let payload = SigningPayload::for_receipt(&receipt(), &domain());
        let mut other_domain = domain();
        other_domain.chain_id = 10;
        let other = SigningPayload::for_receipt(&receipt(), &other_domain);
        assert_ne!(payload.signing_hash(), other.signing_hash());
    }

    #[test]
    fn either_party_can_sign_and_verify() {
        let payload = SigningPayload::for_receipt(&receipt(), &domain());
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();

        let signature = wallet.sign_hash(payload.signing_hash()).unwrap();

        // A verifier re-derives the payload from the receipt alone and checks
        // the signature against its own hash.
        let rederived = SigningPayload::for_receipt(&receipt(), &domain());
        let recovered = signature
            .recover(RecoveryMessage::Hash(rederived.signing_hash()))
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn payload_shape_matches_typed_data() {
        let json = serde_json::to_value(SigningPayload::for_receipt(&receipt(), &domain())).unwrap();
        assert_eq!(json["primaryType"], "InferenceReceipt");
        assert_eq!(json["types"]["InferenceReceipt"][0]["name"], "requestId");
        assert_eq!(json["types"]["InferenceReceipt"][0]["type"], "bytes32");
        assert_eq!(json["message"]["price"], "1000000000000000");
        assert_eq!(json["domain"]["chainId"], 1);
    }
}
