use anyhow::Result;
use receipt_gate::client::payment::PaymentAgent;
use receipt_gate::models::{PricingInfo, SigningPayload};
use reqwest::Client;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let base_url =
        std::env::var("RECEIPT_GATE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let payer_private_key = std::env::var("PAYER_PRIVATE_KEY")?;
    let prompt = std::env::args().nth(1).unwrap_or_else(|| "hello".to_string());

    println!("receipt-gate test agent");
    println!("=======================");
    println!("Server: {}", base_url);
    println!();

    let client = Client::new();

    println!("Step 1: Fetching pricing...");
    let pricing: PricingInfo = client
        .get(format!("{}/api/pricing", base_url))
        .send()
        .await?
        .json()
        .await?;
    println!(
        "   Terms: {} {} on chain {}, pay to {:#x}",
        pricing.amount, pricing.asset, pricing.chain_id, pricing.pay_to
    );
    println!();

    let agent = PaymentAgent::new(&payer_private_key, pricing.chain_id)?;
    println!("Paying as {:#x}", agent.address());
    println!();

    println!("Step 2: Requesting without payment (expecting 402)...");
    let response = client
        .post(format!("{}/api/generate", base_url))
        .json(&serde_json::json!({ "prompt": prompt }))
        .send()
        .await?;
    if response.status() != 402 {
        anyhow::bail!("Expected 402 Payment Required, got {}", response.status());
    }
    println!("   [OK] Received 402 Payment Required");
    println!();

    println!("Step 3: Building and signing a payment proof...");
    let proof = agent.build_proof(
        pricing.amount,
        &pricing.asset,
        pricing.chain_id,
        pricing.pay_to,
        600,
    )?;
    let header = PaymentAgent::payment_header(&proof)?;
    println!("   Nonce: {:#x}", proof.nonce);
    println!();

    println!("Step 4: Retrying with payment proof...");
    let response = client
        .post(format!("{}/api/generate", base_url))
        .header("X-Payment", header)
        .json(&serde_json::json!({ "prompt": prompt }))
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("Request failed: {}", response.text().await?);
    }

    let body: Value = response.json().await?;
    println!("   [OK] Paid request fulfilled");
    println!("   Request id: {}", body["requestId"]);
    println!("   Receipt:");
    println!("{}", serde_json::to_string_pretty(&body["receipt"])?);
    println!();

    if body["posted"].is_object() {
        println!("Server already posted the receipt on-chain:");
        println!("   tx: {}", body["posted"]["txHash"]);
        println!("   explorer: {}", body["posted"]["explorerUrl"]);
        return Ok(());
    }

    println!("Step 5: Server did not post; countersigning as the payer...");
    let payload: SigningPayload = serde_json::from_value(body["signingPayload"].clone())?;
    let signature = agent.countersign(&payload)?;
    println!("   Signing hash: {:#x}", payload.signing_hash());
    println!("   Payer attestation: 0x{}", hex::encode(signature.to_vec()));
    println!(
        "   Submit via {} at {}",
        body["instructions"]["posting"]["method"], body["instructions"]["posting"]["contract"]
    );

    Ok(())
}
