use std::time::Duration;

use crate::error::GateError;
use crate::models::GenerationResult;

/// Prompts past this length are refused before the backend is invoked.
const MAX_PROMPT_CHARS: usize = 4096;

/// The protected operation the payment gate fronts: a simulated generation
/// backend. Output is a deterministic function of the prompt, so a retried
/// request hashes to the same result digest.
pub struct GenerationService {
    model: String,
    simulated_latency: Duration,
}

impl GenerationService {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            simulated_latency: Duration::from_millis(25),
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GenerationResult, GateError> {
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(GateError::GenerationFailed(format!(
                "prompt exceeds {} characters",
                MAX_PROMPT_CHARS
            )));
        }

        // Stand-in for model inference latency
        tokio::time::sleep(self.simulated_latency).await;

        let result = GenerationResult {
            prompt: prompt.to_string(),
            output: format!("[{}] completion for: {}", self.model, prompt),
            model: self.model.clone(),
        };

        tracing::info!(
            model = %self.model,
            prompt_chars = prompt.len(),
            "Generation complete"
        );

        Ok(result)
    }
}
