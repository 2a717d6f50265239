use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::models::u256_dec;
use crate::models::{Receipt, SigningPayload};

/// Successful response from the protected endpoint.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaidResponse<T> {
    pub success: bool,
    pub result: T,
    pub request_id: H256,
    pub receipt: Receipt,
    pub signing_payload: SigningPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted: Option<PostResult>,
    pub instructions: Instructions,
}

/// Outcome of a confirmed on-chain submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostResult {
    #[serde(with = "u256_dec")]
    pub receipt_id: U256,
    pub tx_hash: H256,
    pub block_number: u64,
    pub explorer_url: String,
}

/// What the caller should do next. Exactly one of the two shapes appears:
/// the server already posted, or the client holds posting responsibility.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum Instructions {
    #[serde(rename_all = "camelCase")]
    ServerPosted { status: String },
    #[serde(rename_all = "camelCase")]
    ClientPosting {
        client_attestation: ClientAttestation,
        posting: PostingTarget,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientAttestation {
    pub message: String,
    pub signing_hash: H256,
    pub sign_with: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PostingTarget {
    pub contract: Address,
    pub method: String,
    pub chain_id: u64,
    pub explorer_url: String,
}

impl Instructions {
    pub fn server_posted(post: &PostResult) -> Self {
        Self::ServerPosted {
            status: format!(
                "receipt recorded on-chain by the server (receipt id {}, tx {:#x}); no client submission needed",
                post.receipt_id, post.tx_hash
            ),
        }
    }

    pub fn client_posting(payload: &SigningPayload, posting: PostingTarget) -> Self {
        Self::ClientPosting {
            client_attestation: ClientAttestation {
                message: format!(
                    "sign the signingPayload and submit the receipt to {} via {}",
                    posting.contract, posting.method
                ),
                signing_hash: payload.signing_hash(),
                sign_with: "eth_signTypedData_v4".to_string(),
            },
            posting,
        }
    }
}

/// Advertised payment terms for the unauthenticated pricing query.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub asset: String,
    pub chain_id: u64,
    pub pay_to: Address,
    pub accepts: Vec<AcceptedMethod>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedMethod {
    pub scheme: String,
    pub header: String,
    pub encoding: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub dedup_store: bool,
    pub ledger_rpc: Option<bool>,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
