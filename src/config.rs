use anyhow::{bail, Context, Result};
use ethers::types::{Address, U256};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

/// The payment terms this server charges for the protected endpoint.
/// Loaded once at startup and immutable afterwards; the payment gate and the
/// receipt builder both read the same instance, so the receipt always commits
/// to exactly the price that was enforced.
#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub price_wei: U256,
    pub asset: String,
    pub chain_id: u64,
    pub pay_to: Address,
}

/// How inbound payment proofs are cryptographically verified.
#[derive(Debug, Clone)]
pub enum VerifierConfig {
    /// Recover the payer from the proof's EIP-712 signature locally.
    Signature,
    /// Delegate verification to a remote x402 facilitator at this base URL.
    Facilitator(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    pub price: PriceConfig,

    // Receipt ledger (IRSB contract)
    pub rpc_url: String,
    pub irsb_address: Address,
    pub explorer_base_url: String,

    // Server-side posting; when disabled the client self-posts
    pub server_posting_enabled: bool,
    pub server_private_key: Option<String>,

    // Payment verification
    pub verifier: VerifierConfig,
    pub verify_timeout: Duration,
    pub post_timeout: Duration,

    // EIP-712 domain for receipt attestations
    pub domain_name: String,
    pub domain_version: String,

    // Optional redis backing for the idempotency store
    pub redis_url: Option<String>,

    // Rate Limiting
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let price = PriceConfig {
            price_wei: U256::from_dec_str(
                &std::env::var("PRICE_WEI").unwrap_or_else(|_| "1000000000000000".to_string()),
            )
            .context("Invalid PRICE_WEI")?,
            asset: std::env::var("ASSET").unwrap_or_else(|_| "ETH".to_string()),
            chain_id: std::env::var("CHAIN_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid CHAIN_ID")?,
            pay_to: Self::parse_address("PAY_TO_ADDRESS")?,
        };

        let verifier = match std::env::var("FACILITATOR_URL") {
            Ok(url) => VerifierConfig::Facilitator(url),
            Err(_) => VerifierConfig::Signature,
        };

        let config = Self {
            environment: environment.clone(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid PORT")?,

            price,

            rpc_url: std::env::var("RPC_URL").context("RPC_URL required")?,
            irsb_address: Self::parse_address("IRSB_ADDRESS")?,
            explorer_base_url: std::env::var("EXPLORER_BASE_URL")
                .unwrap_or_else(|_| "https://etherscan.io".to_string()),

            server_posting_enabled: std::env::var("SERVER_POSTING_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            server_private_key: std::env::var("SERVER_PRIVATE_KEY").ok(),

            verifier,
            verify_timeout: Duration::from_secs(
                std::env::var("VERIFY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid VERIFY_TIMEOUT_SECS")?,
            ),
            post_timeout: Duration::from_secs(
                std::env::var("POST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid POST_TIMEOUT_SECS")?,
            ),

            domain_name: std::env::var("DOMAIN_NAME")
                .unwrap_or_else(|_| "InferenceReceiptSettlementBoard".to_string()),
            domain_version: std::env::var("DOMAIN_VERSION").unwrap_or_else(|_| "1".to_string()),

            redis_url: std::env::var("REDIS_URL").ok(),

            rate_limit_per_second: std::env::var("RATE_LIMIT_PER_SECOND")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_PER_SECOND")?,
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_BURST")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(var: &str) -> Result<Address> {
        let addr_str = std::env::var(var).with_context(|| format!("{} required", var))?;
        Address::from_str(&addr_str).with_context(|| format!("Invalid address for {}", var))
    }

    fn validate(&self) -> Result<()> {
        if self.price.price_wei.is_zero() {
            bail!("PRICE_WEI must be nonzero");
        }
        if !self.rpc_url.starts_with("http") {
            bail!("RPC_URL must be HTTP(S) URL");
        }
        if !self.explorer_base_url.starts_with("http") {
            bail!("EXPLORER_BASE_URL must be HTTP(S) URL");
        }
        if let VerifierConfig::Facilitator(url) = &self.verifier {
            if !url.starts_with("http") {
                bail!("FACILITATOR_URL must be HTTP(S) URL");
            }
        }

        // Posting needs a key to submit ledger transactions with
        if self.server_posting_enabled {
            match &self.server_private_key {
                Some(key) if key.starts_with("0x") => {}
                Some(_) => bail!("SERVER_PRIVATE_KEY must start with 0x"),
                None => bail!("SERVER_PRIVATE_KEY required when SERVER_POSTING_ENABLED"),
            }
        }

        tracing::info!(
            "Configuration validated for {:?} environment (posting: {})",
            self.environment,
            if self.server_posting_enabled { "server" } else { "client" }
        );

        Ok(())
    }
}
