//! Model metadata parsing
//!
//! Parses the fields of a HuggingFace `config.json` that matter for loading a
//! causal LM: architecture, context window, stored precision and EOS tokens.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model metadata extracted from HuggingFace config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HfModelMetadata {
    /// Model architecture type (e.g., "llama", "mistral", "qwen2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_size: Option<u32>,

    /// Context window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attention_heads: Option<u32>,

    /// Precision the checkpoint was saved in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torch_dtype: Option<String>,

    /// End-of-sequence ids (configs use either a number or a list)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eos_token_ids: Vec<u32>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    hidden_size: Option<u32>,
    intermediate_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    vocab_size: Option<u32>,
    num_hidden_layers: Option<u32>,
    num_attention_heads: Option<u32>,
    torch_dtype: Option<String>,
    #[serde(default)]
    eos_token_id: Option<serde_json::Value>,
    // GPT-2 style names
    n_embd: Option<u32>,
    n_positions: Option<u32>,
    n_layer: Option<u32>,
    n_head: Option<u32>,
}

fn token_ids(value: Option<serde_json::Value>) -> Vec<u32> {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
        Some(serde_json::Value::Array(ids)) => ids
            .iter()
            .filter_map(|v| v.as_u64())
            .map(|id| id as u32)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse metadata from config.json content
pub fn parse_config_str(content: &str) -> Option<HfModelMetadata> {
    let raw: RawConfig = serde_json::from_str(content).ok()?;

    Some(HfModelMetadata {
        model_type: raw.model_type,
        hidden_size: raw.hidden_size.or(raw.n_embd),
        intermediate_size: raw.intermediate_size,
        max_position_embeddings: raw.max_position_embeddings.or(raw.n_positions),
        vocab_size: raw.vocab_size,
        num_hidden_layers: raw.num_hidden_layers.or(raw.n_layer),
        num_attention_heads: raw.num_attention_heads.or(raw.n_head),
        torch_dtype: raw.torch_dtype,
        eos_token_ids: token_ids(raw.eos_token_id),
    })
}

/// Parse model metadata from a snapshot directory's config.json
///
/// Returns `None` if config.json doesn't exist or can't be parsed
pub fn parse_model_config(snapshot_path: &Path) -> Option<HfModelMetadata> {
    let content = std::fs::read_to_string(snapshot_path.join("config.json")).ok()?;
    parse_config_str(&content)
}

/// Estimate number of parameters from model metadata
///
/// This is a rough estimate based on transformer architecture
pub fn estimate_parameters(metadata: &HfModelMetadata) -> Option<u64> {
    let hidden = metadata.hidden_size? as u64;
    let layers = metadata.num_hidden_layers? as u64;
    let vocab = metadata.vocab_size? as u64;

    // Attention is 4 * hidden^2 per layer; gated MLPs use 3 * hidden * intermediate,
    // classic MLPs 8 * hidden^2.
    let mlp = match metadata.intermediate_size {
        Some(intermediate) => 3 * hidden * intermediate as u64,
        None => 8 * hidden * hidden,
    };
    let embedding_params = vocab * hidden;
    let layer_params = layers * (4 * hidden * hidden + mlp);

    Some(embedding_params + layer_params)
}
