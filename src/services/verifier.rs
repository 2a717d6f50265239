use async_trait::async_trait;
use ethers::types::{Address, RecoveryMessage, Signature};
use serde::Deserialize;

use crate::error::GateError;
use crate::models::PaymentProof;

/// Cryptographic verification of a payment proof. The gate has already
/// checked the declared terms against the price config; implementations only
/// establish that the proof itself is genuine.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, proof: &PaymentProof) -> Result<(), GateError>;
}

/// Local verification: recover the EIP-712 signer from the proof's signature
/// and require it to be the declared payer, paying this provider.
pub struct SignatureVerifier {
    pay_to: Address,
}

impl SignatureVerifier {
    pub fn new(pay_to: Address) -> Self {
        Self { pay_to }
    }
}

#[async_trait]
impl PaymentVerifier for SignatureVerifier {
    async fn verify(&self, proof: &PaymentProof) -> Result<(), GateError> {
        if proof.pay_to != self.pay_to {
            return Err(GateError::PaymentVerificationFailed(format!(
                "payment addressed to {:#x}, not this provider",
                proof.pay_to
            )));
        }

        let raw = hex::decode(proof.signature.trim_start_matches("0x")).map_err(|e| {
            GateError::PaymentVerificationFailed(format!("malformed signature hex: {}", e))
        })?;
        let signature = Signature::try_from(raw.as_slice()).map_err(|e| {
            GateError::PaymentVerificationFailed(format!("invalid signature: {}", e))
        })?;

        let recovered = signature
            .recover(RecoveryMessage::Hash(proof.authorization_hash()))
            .map_err(|e| {
                GateError::PaymentVerificationFailed(format!("signature recovery failed: {}", e))
            })?;

        if recovered != proof.payer {
            return Err(GateError::PaymentVerificationFailed(format!(
                "signer {:#x} does not match declared payer {:#x}",
                recovered, proof.payer
            )));
        }

        tracing::debug!(payer = %proof.payer, "Payment signature verified");
        Ok(())
    }
}

/// Remote verification against an x402 facilitator's /verify endpoint.
pub struct FacilitatorVerifier {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct VerifyOutcome {
    valid: bool,
    reason: Option<String>,
}

impl FacilitatorVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentVerifier for FacilitatorVerifier {
    async fn verify(&self, proof: &PaymentProof) -> Result<(), GateError> {
        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .json(proof)
            .send()
            .await
            .map_err(|e| {
                GateError::PaymentVerificationFailed(format!("facilitator unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(GateError::PaymentVerificationFailed(format!(
                "facilitator returned {}",
                response.status()
            )));
        }

        let outcome: VerifyOutcome = response.json().await.map_err(|e| {
            GateError::PaymentVerificationFailed(format!("facilitator response malformed: {}", e))
        })?;

        if !outcome.valid {
            return Err(GateError::PaymentVerificationFailed(
                outcome
                    .reason
                    .unwrap_or_else(|| "rejected by facilitator".to_string()),
            ));
        }

        tracing::debug!(payer = %proof.payer, "Facilitator verified payment");
        Ok(())
    }
}

/// Accept-all (or reject-with-reason) verifier for tests and development.
#[derive(Default)]
pub struct MockVerifier {
    pub reject: Option<String>,
}

#[async_trait]
impl PaymentVerifier for MockVerifier {
    async fn verify(&self, _proof: &PaymentProof) -> Result<(), GateError> {
        match &self.reject {
            Some(reason) => Err(GateError::PaymentVerificationFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::payment::PaymentAgent;
    use ethers::types::U256;

    const PAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn pay_to() -> Address {
        "0x2222222222222222222222222222222222222222".parse().unwrap()
    }

    fn signed_proof(key: &str) -> PaymentProof {
        let agent = PaymentAgent::new(key, 1).unwrap();
        agent
            .build_proof(
                U256::from_dec_str("1000000000000000").unwrap(),
                "ETH",
                1,
                pay_to(),
                600,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_a_correctly_signed_proof() {
        let verifier = SignatureVerifier::new(pay_to());
        let proof = signed_proof(PAYER_KEY);
        verifier.verify(&proof).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_signature_by_the_wrong_key() {
        let verifier = SignatureVerifier::new(pay_to());
        let mut proof = signed_proof(PAYER_KEY);
        let forged = signed_proof(OTHER_KEY);
        proof.signature = forged.signature;
        let err = verifier.verify(&proof).await.unwrap_err();
        assert!(matches!(err, GateError::PaymentVerificationFailed(_)));
    }

    #[tokio::test]
    async fn rejects_payment_to_another_provider() {
        let verifier =
            SignatureVerifier::new("0x3333333333333333333333333333333333333333".parse().unwrap());
        let proof = signed_proof(PAYER_KEY);
        let err = verifier.verify(&proof).await.unwrap_err();
        assert!(err.to_string().contains("not this provider"));
    }

    #[tokio::test]
    async fn facilitator_approval_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/verify")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"valid": true, "reason": null}"#)
            .create_async()
            .await;

        let verifier = FacilitatorVerifier::new(server.url());
        verifier.verify(&signed_proof(PAYER_KEY)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn facilitator_rejection_carries_the_reason() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/verify")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"valid": false, "reason": "nonce already settled"}"#)
            .create_async()
            .await;

        let verifier = FacilitatorVerifier::new(server.url());
        let err = verifier.verify(&signed_proof(PAYER_KEY)).await.unwrap_err();
        assert!(err.to_string().contains("nonce already settled"));
    }
}
