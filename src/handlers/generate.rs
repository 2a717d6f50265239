use axum::{extract::State, Extension, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::PriceConfig,
    error::GateError,
    models::{
        AttestationDomain, GenerateRequest, GenerationResult, Instructions, PaidResponse,
        PostingTarget, Receipt, SigningPayload, ValidatedPayment,
    },
    services::{GenerationService, ReceiptPoster},
};

/// Endpoint identifier committed into every receipt issued here.
pub const GENERATE_ENDPOINT: &str = "/api/generate";

#[derive(Clone)]
pub struct GenerateState {
    pub generation: Arc<GenerationService>,
    pub price: PriceConfig,
    pub domain: AttestationDomain,
    /// Present only when server-side posting is enabled.
    pub poster: Option<Arc<ReceiptPoster>>,
    /// Where a client self-posts when the server did not.
    pub posting_target: PostingTarget,
}

pub async fn generate(
    State(state): State<GenerateState>,
    Extension(payment): Extension<ValidatedPayment>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<PaidResponse<GenerationResult>>, GateError> {
    let prompt = body
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(GateError::MissingField("prompt"))?;

    // The protected operation must complete before any receipt exists; if it
    // fails, the caller gets a terminal error and no receipt is minted.
    let result = state.generation.generate(prompt).await?;

    let receipt = Receipt::issue(
        &payment,
        GENERATE_ENDPOINT,
        &result,
        &state.price,
        Utc::now().timestamp().max(0) as u64,
    )?;
    let signing_payload = SigningPayload::for_receipt(&receipt, &state.domain);

    // Best-effort: the receipt is already authoritative, so a posting failure
    // downgrades to client-side instructions instead of failing the request.
    // Runs as a detached task so a client disconnect cannot abort a
    // submission that is already in flight.
    let posted = match &state.poster {
        Some(poster) => {
            let poster = poster.clone();
            let posting_receipt = receipt.clone();
            let outcome =
                tokio::spawn(async move { poster.post(&posting_receipt).await }).await;
            match outcome {
                Ok(Ok(post)) => Some(post),
                Ok(Err(e)) => {
                    tracing::warn!(
                        request_id = %receipt.request_id,
                        error = %e,
                        "On-chain posting failed, falling back to client-side posting"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %receipt.request_id,
                        error = %e,
                        "On-chain posting task aborted, falling back to client-side posting"
                    );
                    None
                }
            }
        }
        None => None,
    };

    let instructions = match &posted {
        Some(post) => Instructions::server_posted(post),
        None => Instructions::client_posting(&signing_payload, state.posting_target.clone()),
    };

    Ok(Json(PaidResponse {
        success: true,
        request_id: receipt.request_id,
        result,
        receipt,
        signing_payload,
        posted,
        instructions,
    }))
}
