//! Generation request and result types

use serde::{Deserialize, Serialize};

/// Largest `max_length`/`max_new_tokens` a request may ask for
pub const MAX_TOKEN_BUDGET: usize = 1 << 20;

/// Largest `num_return_sequences` a request may ask for
pub const MAX_RETURN_SEQUENCES: usize = 16;

/// A single text-generation call against the deployed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,

    /// Total sequence length (prompt + generated); also the truncation bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Tokens to generate; takes precedence over `max_length` for sizing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// 0 disables top-k filtering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(default = "default_do_sample")]
    pub do_sample: bool,

    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_do_sample() -> bool {
    true
}

fn default_num_return_sequences() -> usize {
    1
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_length: None,
            max_new_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            do_sample: default_do_sample(),
            num_return_sequences: default_num_return_sequences(),
            seed: None,
        }
    }

    /// Check field ranges; returns a message describing the first violation
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        for (field, value) in [("max_length", self.max_length), ("max_new_tokens", self.max_new_tokens)] {
            match value {
                Some(0) => return Err(format!("{field} must be at least 1")),
                Some(n) if n > MAX_TOKEN_BUDGET => {
                    return Err(format!("{field} must be at most {MAX_TOKEN_BUDGET} (got {n})"));
                }
                _ => {}
            }
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(format!("temperature must be within [0, 2] (got {temperature})"));
        }
        if let Some(top_p) = self.top_p
            && !(top_p > 0.0 && top_p <= 1.0)
        {
            return Err(format!("top_p must be within (0, 1] (got {top_p})"));
        }
        if !(1..=MAX_RETURN_SEQUENCES).contains(&self.num_return_sequences) {
            return Err(format!(
                "num_return_sequences must be within [1, {MAX_RETURN_SEQUENCES}] (got {})",
                self.num_return_sequences
            ));
        }
        Ok(())
    }
}

/// Output of a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub model: String,
    /// One entry per requested return sequence, prompt prefix removed
    pub variants: Vec<String>,
    pub input_tokens: usize,
    /// Generated tokens summed over all variants
    pub output_tokens: usize,
    pub max_new_tokens: usize,
    /// Wall-clock seconds
    pub generation_time: f64,
}
