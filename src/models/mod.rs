pub mod attestation;
pub mod generation;
pub mod payment;
pub mod receipt;
pub mod response;

pub use attestation::*;
pub use generation::*;
pub use payment::*;
pub use receipt::*;
pub use response::*;

/// Serde adapter rendering U256 amounts as decimal strings on the wire
/// (`"1000000000000000"`), not the hex form ethers defaults to.
pub mod u256_dec {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}
