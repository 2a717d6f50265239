pub mod cache;
pub mod generation;
pub mod poster;
pub mod verifier;

pub use cache::DedupStore;
pub use generation::GenerationService;
pub use poster::{EvmLedger, MockLedger, PostError, ReceiptLedger, ReceiptPoster};
pub use verifier::{FacilitatorVerifier, MockVerifier, PaymentVerifier, SignatureVerifier};
