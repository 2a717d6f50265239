use axum::{extract::State, Json};
use chrono::Utc;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    models::HealthStatus,
    services::{DedupStore, ReceiptLedger},
};

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<DedupStore>,
    pub ledger: Option<Arc<dyn ReceiptLedger>>,
    pub started_at: Instant,
}

pub async fn health_check(State(state): State<HealthState>) -> Json<HealthStatus> {
    let store_ok = state.store.ping().await.unwrap_or(false);

    let ledger_ok = match &state.ledger {
        Some(ledger) => Some(ledger.lookup(H256::zero()).await.is_ok()),
        None => None,
    };

    let status = match (store_ok, ledger_ok) {
        (true, Some(true) | None) => "healthy",
        (true, Some(false)) => "degraded",
        _ => "unhealthy",
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dedup_store: store_ok,
        ledger_rpc: ledger_ok,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
