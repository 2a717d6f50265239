use axum::{extract::State, Json};

use crate::{
    config::PriceConfig,
    models::{AcceptedMethod, PricingInfo},
};

#[derive(Clone)]
pub struct PricingState {
    pub price: PriceConfig,
}

/// Unauthenticated pricing query: purely informational, no side effects.
pub async fn pricing(State(state): State<PricingState>) -> Json<PricingInfo> {
    Json(PricingInfo {
        amount: state.price.price_wei,
        asset: state.price.asset.clone(),
        chain_id: state.price.chain_id,
        pay_to: state.price.pay_to,
        accepts: vec![AcceptedMethod {
            scheme: "x402.transfer-authorization".to_string(),
            header: "X-Payment".to_string(),
            encoding: "base64(json PaymentProof)".to_string(),
        }],
    })
}
