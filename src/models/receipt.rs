use anyhow::{Context, Result};
use ethers::abi::{encode, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::config::PriceConfig;
use crate::models::u256_dec;
use crate::models::{GenerationResult, ValidatedPayment};

/// Canonical record of a fulfilled paid request. Immutable once issued; the
/// request id is a pure function of the committed fields, so a client retry
/// with the same proof and result re-derives the identical receipt instead of
/// minting a second one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub request_id: H256,
    pub payment_hash: H256,
    pub endpoint: String,
    pub result_hash: H256,
    #[serde(rename = "price", with = "u256_dec")]
    pub price_wei: U256,
    pub asset: String,
    pub issued_at: u64,
}

impl Receipt {
    /// Build the receipt for a completed paid operation. Pure: no I/O, and
    /// identical inputs yield byte-identical receipts apart from `issued_at`,
    /// which is excluded from the request id.
    pub fn issue(
        payment: &ValidatedPayment,
        endpoint: &str,
        result: &GenerationResult,
        price: &PriceConfig,
        issued_at: u64,
    ) -> Result<Self> {
        let result_hash = Self::result_digest(result)?;
        let request_id = Self::derive_request_id(
            payment.proof_digest,
            endpoint,
            result_hash,
            price.price_wei,
            &price.asset,
        );

        Ok(Self {
            request_id,
            payment_hash: payment.proof_digest,
            endpoint: endpoint.to_string(),
            result_hash,
            price_wei: price.price_wei,
            asset: price.asset.clone(),
            issued_at,
        })
    }

    /// Digest of the result's canonical JSON encoding. The receipt commits to
    /// this rather than the raw payload to keep receipts small.
    pub fn result_digest(result: &GenerationResult) -> Result<H256> {
        let bytes = serde_json::to_vec(result).context("result payload not serializable")?;
        Ok(H256::from(keccak256(bytes)))
    }

    /// requestId = keccak256(abi.encode(paymentHash, keccak256(endpoint),
    /// resultHash, price, keccak256(asset))). Timestamp deliberately excluded
    /// so retried submissions collapse onto one id.
    pub fn derive_request_id(
        payment_hash: H256,
        endpoint: &str,
        result_hash: H256,
        price_wei: U256,
        asset: &str,
    ) -> H256 {
        let encoded = encode(&[
            Token::FixedBytes(payment_hash.as_bytes().to_vec()),
            Token::FixedBytes(keccak256(endpoint.as_bytes()).to_vec()),
            Token::FixedBytes(result_hash.as_bytes().to_vec()),
            Token::Uint(price_wei),
            Token::FixedBytes(keccak256(asset.as_bytes()).to_vec()),
        ]);
        H256::from(keccak256(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn price() -> PriceConfig {
        PriceConfig {
            price_wei: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            pay_to: Address::zero(),
        }
    }

    fn payment() -> ValidatedPayment {
        ValidatedPayment {
            payer: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            amount: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            nonce: H256::from_low_u64_be(42),
            proof_digest: H256::from_low_u64_be(9001),
        }
    }

    fn result() -> GenerationResult {
        GenerationResult {
            prompt: "hello".to_string(),
            output: "generated".to_string(),
            model: "sim-1".to_string(),
        }
    }

    #[test]
    fn issuing_twice_is_idempotent() {
        let a = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();
        let b = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn request_id_ignores_timestamp() {
        let a = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();
        let b = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 2000).unwrap();
        assert_eq!(a.request_id, b.request_id);
        assert_ne!(a.issued_at, b.issued_at);
    }

    #[test]
    fn request_id_commits_to_result() {
        let a = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();
        let mut other = result();
        other.output = "different".to_string();
        let b = Receipt::issue(&payment(), "/api/generate", &other, &price(), 1000).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn request_id_commits_to_endpoint_and_payment() {
        let a = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();

        let b = Receipt::issue(&payment(), "/api/other", &result(), &price(), 1000).unwrap();
        assert_ne!(a.request_id, b.request_id);

        let mut other_payment = payment();
        other_payment.proof_digest = H256::from_low_u64_be(9002);
        let c = Receipt::issue(&other_payment, "/api/generate", &result(), &price(), 1000).unwrap();
        assert_ne!(a.request_id, c.request_id);
    }

    #[test]
    fn wire_price_is_decimal_string() {
        let receipt = Receipt::issue(&payment(), "/api/generate", &result(), &price(), 1000).unwrap();
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["price"], "1000000000000000");
        assert_eq!(json["asset"], "ETH");
        assert!(json["requestId"].as_str().unwrap().starts_with("0x"));
    }
}
