use serde::{Deserialize, Serialize};

/// Body of the protected endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Output of the paid-for generation. Serialized field order is fixed by this
/// declaration; the receipt's result digest is computed over these bytes, so
/// reordering fields changes every request id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationResult {
    pub prompt: String,
    pub output: String,
    pub model: String,
}
