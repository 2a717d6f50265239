use crate::config::PriceConfig;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("payment required: {} {} on chain {}", .0.amount, .0.asset, .0.chain_id)]
    PaymentRequired(PaymentTerms),

    #[error("payment mismatch on {field}: expected {expected}, got {got}")]
    PaymentMismatch {
        terms: PaymentTerms,
        field: &'static str,
        expected: String,
        got: String,
    },

    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// The advertised payment terms, echoed back in 402 responses so a rejected
/// caller knows exactly what to pay. Carried inside the error variant rather
/// than read from ambient state.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    #[serde(with = "crate::models::u256_dec")]
    pub amount: U256,
    pub asset: String,
    pub chain_id: u64,
    pub pay_to: Address,
}

impl From<&PriceConfig> for PaymentTerms {
    fn from(price: &PriceConfig) -> Self {
        Self {
            amount: price.price_wei,
            asset: price.asset.clone(),
            chain_id: price.chain_id,
            pay_to: price.pay_to,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_instructions: Option<PaymentInstructions>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInstructions {
    pub scheme: String,
    pub version: String,
    pub payment: PaymentTerms,
    pub format: PaymentFormat,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFormat {
    pub header: String,
    pub encoding: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let (status, error_code, payment_instructions) = match &self {
            GateError::PaymentRequired(terms) => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_REQUIRED",
                Some(create_payment_instructions(terms)),
            ),
            GateError::PaymentMismatch { terms, .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_MISMATCH",
                Some(create_payment_instructions(terms)),
            ),
            GateError::PaymentVerificationFailed(_) => {
                (StatusCode::PAYMENT_REQUIRED, "PAYMENT_VERIFICATION_FAILED", None)
            }
            GateError::MissingField(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            GateError::GenerationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_FAILED", None)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
            payment_instructions,
        };

        tracing::warn!(
            error = ?self,
            error_code = error_code,
            "Request rejected"
        );

        (status, Json(body)).into_response()
    }
}

fn create_payment_instructions(terms: &PaymentTerms) -> PaymentInstructions {
    PaymentInstructions {
        scheme: "x402.transfer-authorization".to_string(),
        version: "1".to_string(),
        payment: terms.clone(),
        format: PaymentFormat {
            header: "X-Payment".to_string(),
            encoding: "base64(json PaymentProof)".to_string(),
        },
    }
}
