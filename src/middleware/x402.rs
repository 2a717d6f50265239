use axum::{extract::Request, middleware::Next, response::Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PriceConfig;
use crate::error::{GateError, PaymentTerms};
use crate::models::{PaymentProof, ValidatedPayment};
use crate::services::PaymentVerifier;

/// The payment gate. Runs strictly before the protected handler: a request
/// either arrives there with a `ValidatedPayment` in its extensions or never
/// arrives at all. The gate holds no mutable state and never settles the
/// payment; it only validates and annotates.
#[derive(Clone)]
pub struct PaymentGate {
    price: PriceConfig,
    verifier: Arc<dyn PaymentVerifier>,
    verify_timeout: Duration,
}

impl PaymentGate {
    pub fn new(
        price: PriceConfig,
        verifier: Arc<dyn PaymentVerifier>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            price,
            verifier,
            verify_timeout,
        }
    }

    pub async fn check(&self, payment_header: Option<&str>) -> Result<ValidatedPayment, GateError> {
        let Some(header) = payment_header else {
            return Err(GateError::PaymentRequired(PaymentTerms::from(&self.price)));
        };

        let proof = decode_payment_header(header)
            .map_err(GateError::PaymentVerificationFailed)?;

        // Declared terms must equal the configured price exactly; the receipt
        // will commit to the configured price, so any drift here would issue a
        // receipt for an amount that was never paid.
        if proof.amount != self.price.price_wei {
            return Err(self.mismatch("amount", &self.price.price_wei, &proof.amount));
        }
        if proof.asset != self.price.asset {
            return Err(self.mismatch("asset", &self.price.asset, &proof.asset));
        }
        if proof.chain_id != self.price.chain_id {
            return Err(self.mismatch("chainId", &self.price.chain_id, &proof.chain_id));
        }

        let now = Utc::now().timestamp().max(0) as u64;
        if now < proof.valid_after || now > proof.valid_before {
            return Err(GateError::PaymentVerificationFailed(format!(
                "proof outside its validity window [{}, {}]",
                proof.valid_after, proof.valid_before
            )));
        }

        match tokio::time::timeout(self.verify_timeout, self.verifier.verify(&proof)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(GateError::PaymentVerificationFailed(
                    "payment verification timed out".to_string(),
                ))
            }
        }

        tracing::info!(
            payer = %proof.payer,
            amount = %proof.amount,
            asset = %proof.asset,
            "Payment accepted"
        );

        Ok(ValidatedPayment::from(&proof))
    }

    fn mismatch(
        &self,
        field: &'static str,
        expected: &dyn std::fmt::Display,
        got: &dyn std::fmt::Display,
    ) -> GateError {
        GateError::PaymentMismatch {
            terms: PaymentTerms::from(&self.price),
            field,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Decode the X-Payment header: base64 over the proof's JSON encoding.
pub fn decode_payment_header(header_value: &str) -> Result<PaymentProof, String> {
    let bytes = BASE64
        .decode(header_value)
        .map_err(|e| format!("invalid base64 in X-Payment header: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid payment proof JSON: {}", e))
}

// Axum middleware function
pub async fn payment_gate_layer(
    gate: Arc<PaymentGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let payment_header = request
        .headers()
        .get("X-Payment")
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    let payment = gate.check(payment_header.as_deref()).await?;

    // Downstream stages read the validated proof from the request context
    request.extensions_mut().insert(payment);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockVerifier;
    use ethers::types::{H256, U256};

    fn price() -> PriceConfig {
        PriceConfig {
            price_wei: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            pay_to: "0x2222222222222222222222222222222222222222".parse().unwrap(),
        }
    }

    fn gate() -> PaymentGate {
        PaymentGate::new(
            price(),
            Arc::new(MockVerifier::default()),
            Duration::from_secs(2),
        )
    }

    fn proof() -> PaymentProof {
        PaymentProof {
            payer: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            pay_to: "0x2222222222222222222222222222222222222222".parse().unwrap(),
            amount: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            nonce: H256::from_low_u64_be(1),
            valid_after: 0,
            valid_before: u64::MAX,
            signature: "0x00".to_string(),
        }
    }

    fn header_for(proof: &PaymentProof) -> String {
        BASE64.encode(serde_json::to_vec(proof).unwrap())
    }

    #[tokio::test]
    async fn missing_header_is_payment_required() {
        let err = gate().check(None).await.unwrap_err();
        assert!(matches!(err, GateError::PaymentRequired(_)));
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        let err = gate().check(Some("not-base64!!!")).await.unwrap_err();
        assert!(matches!(err, GateError::PaymentVerificationFailed(_)));
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected() {
        let mut p = proof();
        p.amount = U256::from(1u64);
        let err = gate().check(Some(&header_for(&p))).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::PaymentMismatch { field: "amount", .. }
        ));
    }

    #[tokio::test]
    async fn asset_mismatch_is_rejected() {
        let mut p = proof();
        p.asset = "USDC".to_string();
        let err = gate().check(Some(&header_for(&p))).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::PaymentMismatch { field: "asset", .. }
        ));
    }

    #[tokio::test]
    async fn chain_mismatch_is_rejected() {
        let mut p = proof();
        p.chain_id = 8453;
        let err = gate().check(Some(&header_for(&p))).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::PaymentMismatch { field: "chainId", .. }
        ));
    }

    #[tokio::test]
    async fn expired_proof_is_rejected() {
        let mut p = proof();
        p.valid_before = 1; // far in the past
        let err = gate().check(Some(&header_for(&p))).await.unwrap_err();
        assert!(err.to_string().contains("validity window"));
    }

    #[tokio::test]
    async fn verifier_rejection_propagates() {
        let gate = PaymentGate::new(
            price(),
            Arc::new(MockVerifier {
                reject: Some("bad signature".to_string()),
            }),
            Duration::from_secs(2),
        );
        let err = gate.check(Some(&header_for(&proof()))).await.unwrap_err();
        assert!(err.to_string().contains("bad signature"));
    }

    #[tokio::test]
    async fn valid_proof_is_attached() {
        let p = proof();
        let payment = gate().check(Some(&header_for(&p))).await.unwrap();
        assert_eq!(payment.payer, p.payer);
        assert_eq!(payment.proof_digest, p.digest());
    }
}
