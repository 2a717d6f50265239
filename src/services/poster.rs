use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use thiserror::Error;

use crate::contracts::Irsb;
use crate::models::{AttestationDomain, PostResult, Receipt, SigningPayload};
use crate::services::DedupStore;

#[derive(Error, Debug)]
pub enum PostError {
    #[error("ledger call failed: {0}")]
    Ledger(String),

    #[error("ledger transaction reverted")]
    Reverted,

    #[error("on-chain posting timed out")]
    Timeout,

    #[error("attestation signing failed: {0}")]
    Signing(String),
}

/// A receipt as recorded by the ledger.
#[derive(Debug, Clone)]
pub struct OnChainRecord {
    pub receipt_id: U256,
    pub tx_hash: H256,
    pub block_number: u64,
}

/// The external receipt ledger's call contract: one lookup, one submission.
/// The ledger enforces uniqueness per request id, making it the authoritative
/// dedup boundary for concurrent duplicate submissions.
#[async_trait]
pub trait ReceiptLedger: Send + Sync {
    async fn lookup(&self, request_id: H256) -> Result<Option<OnChainRecord>, PostError>;

    async fn record(
        &self,
        receipt: &Receipt,
        attestation: Option<Bytes>,
    ) -> Result<OnChainRecord, PostError>;
}

/// IRSB contract on an EVM chain, submitted to with the server's key.
pub struct EvmLedger {
    contract: Irsb<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl EvmLedger {
    pub fn connect(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        address: Address,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url).context("invalid RPC_URL")?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("invalid SERVER_PRIVATE_KEY")?
            .with_chain_id(chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self {
            contract: Irsb::new(address, client),
        })
    }
}

#[async_trait]
impl ReceiptLedger for EvmLedger {
    async fn lookup(&self, request_id: H256) -> Result<Option<OnChainRecord>, PostError> {
        let (receipt_id, block_number, exists) = self
            .contract
            .lookup(request_id.into())
            .call()
            .await
            .map_err(|e| PostError::Ledger(e.to_string()))?;

        if !exists {
            return Ok(None);
        }

        // The view cannot recover the original submission's tx hash; callers
        // that need it consult the dedup store first.
        Ok(Some(OnChainRecord {
            receipt_id,
            tx_hash: H256::zero(),
            block_number: block_number.as_u64(),
        }))
    }

    async fn record(
        &self,
        receipt: &Receipt,
        attestation: Option<Bytes>,
    ) -> Result<OnChainRecord, PostError> {
        let call = self.contract.record_receipt(
            receipt.request_id.into(),
            receipt.payment_hash.into(),
            receipt.result_hash.into(),
            receipt.endpoint.clone(),
            receipt.price_wei,
            receipt.asset.clone(),
            U256::from(receipt.issued_at),
            attestation.unwrap_or_default(),
        );

        let pending = call
            .send()
            .await
            .map_err(|e| PostError::Ledger(e.to_string()))?;
        let tx = pending
            .await
            .map_err(|e| PostError::Ledger(e.to_string()))?
            .ok_or_else(|| PostError::Ledger("transaction dropped from mempool".to_string()))?;

        if tx.status != Some(1.into()) {
            return Err(PostError::Reverted);
        }

        let (receipt_id, _, _) = self
            .contract
            .lookup(receipt.request_id.into())
            .call()
            .await
            .map_err(|e| PostError::Ledger(e.to_string()))?;

        Ok(OnChainRecord {
            receipt_id,
            tx_hash: tx.transaction_hash,
            block_number: tx.block_number.unwrap_or_default().as_u64(),
        })
    }
}

/// In-memory ledger for tests and development, mirroring the contract's
/// uniqueness rule: recording an already-known request id returns the
/// existing record instead of minting a second one.
#[derive(Default)]
pub struct MockLedger {
    inner: Mutex<MockLedgerInner>,
    fail: bool,
}

#[derive(Default)]
struct MockLedgerInner {
    records: HashMap<H256, OnChainRecord>,
    last_attestation: Option<Bytes>,
    next_id: u64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger whose submissions always fail, for degradation tests.
    pub fn failing() -> Self {
        Self {
            inner: Mutex::new(MockLedgerInner::default()),
            fail: true,
        }
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn last_attestation(&self) -> Option<Bytes> {
        self.inner.lock().ok().and_then(|i| i.last_attestation.clone())
    }
}

#[async_trait]
impl ReceiptLedger for MockLedger {
    async fn lookup(&self, request_id: H256) -> Result<Option<OnChainRecord>, PostError> {
        if self.fail {
            return Err(PostError::Ledger("simulated RPC outage".to_string()));
        }
        let inner = self
            .inner
            .lock()
            .map_err(|_| PostError::Ledger("ledger state poisoned".to_string()))?;
        Ok(inner.records.get(&request_id).cloned())
    }

    async fn record(
        &self,
        receipt: &Receipt,
        attestation: Option<Bytes>,
    ) -> Result<OnChainRecord, PostError> {
        if self.fail {
            return Err(PostError::Ledger("simulated RPC outage".to_string()));
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PostError::Ledger("ledger state poisoned".to_string()))?;

        if let Some(existing) = inner.records.get(&receipt.request_id) {
            return Ok(existing.clone());
        }

        inner.next_id += 1;
        let record = OnChainRecord {
            receipt_id: U256::from(inner.next_id),
            tx_hash: H256::from(keccak256(receipt.request_id.as_bytes())),
            block_number: 1_000_000 + inner.next_id,
        };
        inner.last_attestation = attestation;
        inner.records.insert(receipt.request_id, record.clone());
        Ok(record)
    }
}

/// Submits receipts to the ledger, idempotently and within a bounded timeout.
/// A failure here never fails the paid request; the handler downgrades it to
/// client-side posting instructions.
pub struct ReceiptPoster {
    ledger: Arc<dyn ReceiptLedger>,
    store: Arc<DedupStore>,
    signer: Option<LocalWallet>,
    domain: AttestationDomain,
    contract: Address,
    explorer_base: String,
    timeout: Duration,
}

impl ReceiptPoster {
    pub fn new(
        ledger: Arc<dyn ReceiptLedger>,
        store: Arc<DedupStore>,
        signer: Option<LocalWallet>,
        domain: AttestationDomain,
        contract: Address,
        explorer_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            signer,
            domain,
            contract,
            explorer_base: explorer_base.into(),
            timeout,
        }
    }

    pub async fn post(&self, receipt: &Receipt) -> Result<PostResult, PostError> {
        let key = format!("posted:{:#x}", receipt.request_id);

        if let Some(existing) = self.store.get::<PostResult>(&key).await.ok().flatten() {
            tracing::debug!(request_id = %receipt.request_id, "Receipt already posted, replaying stored outcome");
            return Ok(existing);
        }

        let submit = async {
            if let Some(record) = self.ledger.lookup(receipt.request_id).await? {
                tracing::info!(
                    request_id = %receipt.request_id,
                    receipt_id = %record.receipt_id,
                    "Receipt already recorded on-chain, treating submission as no-op"
                );
                return Ok(self.to_post_result(record));
            }

            let attestation = self.provider_attestation(receipt)?;
            let record = self.ledger.record(receipt, attestation).await?;
            Ok(self.to_post_result(record))
        };

        let post: PostResult = tokio::time::timeout(self.timeout, submit)
            .await
            .map_err(|_| PostError::Timeout)??;

        if let Err(e) = self.store.set(&key, &post).await {
            tracing::warn!("Failed to store posting outcome: {}", e);
        }

        tracing::info!(
            request_id = %receipt.request_id,
            receipt_id = %post.receipt_id,
            tx_hash = %format!("{:#x}", post.tx_hash),
            "Receipt posted on-chain"
        );

        Ok(post)
    }

    /// The provider half of dual attestation: sign the same typed payload the
    /// client would, when a server key is configured.
    fn provider_attestation(&self, receipt: &Receipt) -> Result<Option<Bytes>, PostError> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };

        let payload = SigningPayload::for_receipt(receipt, &self.domain);
        let signature = signer
            .sign_hash(payload.signing_hash())
            .map_err(|e| PostError::Signing(e.to_string()))?;

        Ok(Some(Bytes::from(signature.to_vec())))
    }

    fn to_post_result(&self, record: OnChainRecord) -> PostResult {
        let explorer_url = if record.tx_hash.is_zero() {
            format!("{}/address/{:#x}", self.explorer_base, self.contract)
        } else {
            format!("{}/tx/{:#x}", self.explorer_base, record.tx_hash)
        };

        PostResult {
            receipt_id: record.receipt_id,
            tx_hash: record.tx_hash,
            block_number: record.block_number,
            explorer_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceConfig;
    use crate::models::{GenerationResult, ValidatedPayment};

    const SERVER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn receipt() -> Receipt {
        let payment = ValidatedPayment {
            payer: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            amount: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            nonce: H256::from_low_u64_be(5),
            proof_digest: H256::from_low_u64_be(123),
        };
        let result = GenerationResult {
            prompt: "hello".to_string(),
            output: "generated".to_string(),
            model: "sim-1".to_string(),
        };
        let price = PriceConfig {
            price_wei: U256::from_dec_str("1000000000000000").unwrap(),
            asset: "ETH".to_string(),
            chain_id: 1,
            pay_to: Address::zero(),
        };
        Receipt::issue(&payment, "/api/generate", &result, &price, 1700000000).unwrap()
    }

    fn domain() -> AttestationDomain {
        AttestationDomain {
            name: "InferenceReceiptSettlementBoard".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            verifying_contract: "0x4444444444444444444444444444444444444444"
                .parse()
                .unwrap(),
        }
    }

    async fn poster(ledger: Arc<MockLedger>, signer: Option<LocalWallet>) -> ReceiptPoster {
        let store = Arc::new(DedupStore::new(None).await.unwrap());
        ReceiptPoster::new(
            ledger,
            store,
            signer,
            domain(),
            "0x4444444444444444444444444444444444444444".parse().unwrap(),
            "https://etherscan.io",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn posting_twice_is_idempotent() {
        let ledger = Arc::new(MockLedger::new());
        let poster = poster(ledger.clone(), None).await;

        let first = poster.post(&receipt()).await.unwrap();
        let second = poster.post(&receipt()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.record_count(), 1);
    }

    #[tokio::test]
    async fn already_recorded_on_chain_is_a_noop_success() {
        let ledger = Arc::new(MockLedger::new());

        // Seed the chain directly, then post through a poster with a cold store.
        let seeded = ledger.record(&receipt(), None).await.unwrap();

        let poster = poster(ledger.clone(), None).await;
        let post = poster.post(&receipt()).await.unwrap();

        assert_eq!(post.receipt_id, seeded.receipt_id);
        assert_eq!(ledger.record_count(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_surfaces_as_post_error() {
        let ledger = Arc::new(MockLedger::failing());
        let poster = poster(ledger, None).await;

        let err = poster.post(&receipt()).await.unwrap_err();
        assert!(matches!(err, PostError::Ledger(_)));
    }

    #[tokio::test]
    async fn server_key_attaches_a_provider_attestation() {
        let ledger = Arc::new(MockLedger::new());
        let signer: LocalWallet = SERVER_KEY.parse().unwrap();
        let poster = poster(ledger.clone(), Some(signer)).await;

        poster.post(&receipt()).await.unwrap();

        let attestation = ledger.last_attestation().expect("attestation attached");
        assert_eq!(attestation.len(), 65);
    }
}
