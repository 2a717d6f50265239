use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use uuid::Uuid;

use crate::models::{PaymentProof, SigningPayload};

/// The payer's side of the protocol: builds signed payment proofs for the
/// X-Payment header and countersigns receipt payloads (the client half of
/// dual attestation).
pub struct PaymentAgent {
    wallet: LocalWallet,
}

impl PaymentAgent {
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("invalid payer private key")?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Build a transfer authorization for the advertised terms, valid for
    /// `ttl_secs` from now. Each proof carries a fresh nonce.
    pub fn build_proof(
        &self,
        amount: U256,
        asset: &str,
        chain_id: u64,
        pay_to: Address,
        ttl_secs: u64,
    ) -> Result<PaymentProof> {
        let now = Utc::now().timestamp().max(0) as u64;

        let mut proof = PaymentProof {
            payer: self.wallet.address(),
            pay_to,
            amount,
            asset: asset.to_string(),
            chain_id,
            nonce: H256::from(keccak256(Uuid::new_v4().as_bytes())),
            valid_after: now.saturating_sub(60),
            valid_before: now + ttl_secs,
            signature: String::new(),
        };

        let signature = self
            .wallet
            .sign_hash(proof.authorization_hash())
            .context("failed to sign payment authorization")?;
        proof.signature = format!("0x{}", hex::encode(signature.to_vec()));

        Ok(proof)
    }

    /// Encode a proof for the X-Payment header.
    pub fn payment_header(proof: &PaymentProof) -> Result<String> {
        let json = serde_json::to_vec(proof).context("failed to encode payment proof")?;
        Ok(BASE64.encode(json))
    }

    /// Sign a receipt's typed payload as the payer.
    pub fn countersign(&self, payload: &SigningPayload) -> Result<Signature> {
        self.wallet
            .sign_hash(payload.signing_hash())
            .context("failed to sign receipt payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::RecoveryMessage;

    const PAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn built_proof_is_signed_by_the_payer() {
        let agent = PaymentAgent::new(PAYER_KEY, 1).unwrap();
        let proof = agent
            .build_proof(
                U256::from_dec_str("1000000000000000").unwrap(),
                "ETH",
                1,
                "0x2222222222222222222222222222222222222222".parse().unwrap(),
                600,
            )
            .unwrap();

        let raw = hex::decode(proof.signature.trim_start_matches("0x")).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();
        let recovered = signature
            .recover(RecoveryMessage::Hash(proof.authorization_hash()))
            .unwrap();
        assert_eq!(recovered, agent.address());
        assert_eq!(proof.payer, agent.address());
    }

    #[test]
    fn nonces_are_unique_per_proof() {
        let agent = PaymentAgent::new(PAYER_KEY, 1).unwrap();
        let build = || {
            agent
                .build_proof(
                    U256::from(1u64),
                    "ETH",
                    1,
                    Address::zero(),
                    600,
                )
                .unwrap()
        };
        assert_ne!(build().nonce, build().nonce);
    }
}
