use anyhow::{Context, Result};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use ethers::signers::{LocalWallet, Signer};
use receipt_gate::{
    config::{Config, VerifierConfig},
    handlers::*,
    middleware::{apply_rate_limit, payment_gate_layer, PaymentGate},
    models::{AttestationDomain, PostingTarget},
    services::*,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting receipt-gate v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Charging {} {} on chain {} per request",
        config.price.price_wei,
        config.price.asset,
        config.price.chain_id
    );

    // Initialize services
    let store = Arc::new(DedupStore::new(config.redis_url.as_deref()).await?);
    let generation = Arc::new(GenerationService::new("receipt-gate-sim-1"));

    let verifier: Arc<dyn PaymentVerifier> = match &config.verifier {
        VerifierConfig::Signature => Arc::new(SignatureVerifier::new(config.price.pay_to)),
        VerifierConfig::Facilitator(url) => Arc::new(FacilitatorVerifier::new(url.clone())),
    };

    let domain = AttestationDomain {
        name: config.domain_name.clone(),
        version: config.domain_version.clone(),
        chain_id: config.price.chain_id,
        verifying_contract: config.irsb_address,
    };

    // Server-side posting is opt-in; otherwise the client bears posting
    // responsibility and the ledger is never contacted.
    let mut ledger: Option<Arc<dyn ReceiptLedger>> = None;
    let mut poster: Option<Arc<ReceiptPoster>> = None;
    if config.server_posting_enabled {
        let key = config
            .server_private_key
            .clone()
            .context("SERVER_PRIVATE_KEY required when SERVER_POSTING_ENABLED")?;
        let evm: Arc<dyn ReceiptLedger> = Arc::new(EvmLedger::connect(
            &config.rpc_url,
            &key,
            config.price.chain_id,
            config.irsb_address,
        )?);
        let signer = key
            .parse::<LocalWallet>()
            .context("invalid SERVER_PRIVATE_KEY")?
            .with_chain_id(config.price.chain_id);

        poster = Some(Arc::new(ReceiptPoster::new(
            evm.clone(),
            store.clone(),
            Some(signer),
            domain.clone(),
            config.irsb_address,
            config.explorer_base_url.clone(),
            config.post_timeout,
        )));
        ledger = Some(evm);
    }

    // Initialize the payment gate
    let gate = Arc::new(PaymentGate::new(
        config.price.clone(),
        verifier,
        config.verify_timeout,
    ));

    let posting_target = PostingTarget {
        contract: config.irsb_address,
        method: "recordReceipt".to_string(),
        chain_id: config.price.chain_id,
        explorer_url: format!(
            "{}/address/{:#x}",
            config.explorer_base_url, config.irsb_address
        ),
    };

    // Build application state
    let generate_state = GenerateState {
        generation,
        price: config.price.clone(),
        domain,
        poster,
        posting_target,
    };

    let pricing_state = PricingState {
        price: config.price.clone(),
    };

    let health_state = HealthState {
        store: store.clone(),
        ledger,
        started_at: Instant::now(),
    };

    // Build router
    let app = Router::new()
        // Public endpoints (no payment required)
        .route("/health", get(health_check))
        .with_state(health_state)
        .route("/api/pricing", get(pricing))
        .with_state(pricing_state)
        // Protected endpoint (payment required)
        .route(
            "/api/generate",
            post(generate).layer(axum_middleware::from_fn({
                let gate = gate.clone();
                move |req, next| {
                    let gate = gate.clone();
                    async move { payment_gate_layer(gate, req, next).await }
                }
            })),
        )
        .with_state(generate_state)
        // Global middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive());

    let app = apply_rate_limit(app, config.rate_limit_per_second, config.rate_limit_burst)?;

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Pricing query: http://{}/api/pricing", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Shutting down gracefully...");
}
