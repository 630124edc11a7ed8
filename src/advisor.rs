//! Resource advisor
//!
//! Estimates the RAM a hub model needs and recommends device and quantization
//! settings. The model manager logs the advice but never enforces it: a spec
//! that conflicts with it is still loaded and fails naturally if memory runs out.

use crate::models::{
    estimate_parameters, get_cache_size_in, get_model_cache_path_in, parse_model_config,
};
use serde::Serialize;
use std::path::PathBuf;
use sysinfo::System;

const GIB: u64 = 1024 * 1024 * 1024;

/// Coarse model size class derived from the identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    XLarge,
}

impl SizeCategory {
    /// Classify by the size markers hub identifiers conventionally carry
    pub fn from_identifier(identifier: &str) -> Self {
        let lower = identifier.to_lowercase();
        let has_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if has_any(&["20b", "gpt-oss", "70b", "175b"]) {
            Self::XLarge
        } else if has_any(&["7b", "13b"]) {
            Self::Large
        } else if has_any(&["1b", "2b", "3b"]) {
            Self::Medium
        } else {
            Self::Small
        }
    }

    pub fn required_ram_bytes(&self) -> u64 {
        match self {
            Self::Small => 4 * GIB,
            Self::Medium => 8 * GIB,
            Self::Large => 16 * GIB,
            Self::XLarge => 32 * GIB,
        }
    }
}

/// Host memory at the time of the advice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn probe() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            total_bytes: system.total_memory(),
            available_bytes: system.available_memory(),
        }
    }
}

/// Advisory for a single model
#[derive(Debug, Clone, Serialize)]
pub struct Advisory {
    pub identifier: String,
    pub size_category: SizeCategory,
    pub estimated_ram_bytes: u64,
    /// True when the estimate comes from the cached `config.json`
    pub estimate_from_metadata: bool,
    pub total_ram_bytes: u64,
    pub available_ram_bytes: u64,
    pub fits_in_memory: bool,
    pub recommended_device: String,
    pub recommended_load_in_8bit: bool,
    pub recommended_load_in_4bit: bool,
    pub recommended_models: Vec<String>,
    /// Bytes already in the local hub cache, if the model was fetched before
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size_bytes: Option<u64>,
}

/// Deployable checkpoints by free-RAM tier, with their `model_type`
const RECOMMENDATIONS: &[(u64, &[(&str, &str)])] = &[
    (
        8 * GIB,
        &[
            ("Qwen/Qwen2-0.5B-Instruct", "qwen2"),
            ("TinyLlama/TinyLlama-1.1B-Chat-v1.0", "llama"),
        ],
    ),
    (
        16 * GIB,
        &[
            ("Qwen/Qwen2-1.5B-Instruct", "qwen2"),
            ("TinyLlama/TinyLlama-1.1B-Chat-v1.0", "llama"),
        ],
    ),
    (
        32 * GIB,
        &[
            ("Qwen/Qwen2.5-3B-Instruct", "qwen2"),
            ("Qwen/Qwen2-1.5B-Instruct", "qwen2"),
        ],
    ),
    (
        u64::MAX,
        &[
            ("mistralai/Mistral-7B-v0.1", "mistral"),
            ("Qwen/Qwen2-7B-Instruct", "qwen2"),
        ],
    ),
];

/// Models known to run within the given amount of free RAM
pub fn recommended_models(available_bytes: u64) -> Vec<String> {
    RECOMMENDATIONS
        .iter()
        .find(|(limit, _)| available_bytes < *limit)
        .or(RECOMMENDATIONS.last())
        .map(|(_, models)| models.iter().map(|(id, _)| id.to_string()).collect())
        .unwrap_or_default()
}

/// Build an advisory from already-gathered inputs
pub fn advise_with(
    identifier: &str,
    memory: MemorySnapshot,
    parameter_estimate: Option<u64>,
    accelerator_available: bool,
) -> Advisory {
    let size_category = SizeCategory::from_identifier(identifier);

    // f32 weights plus ~20% for activations, KV cache and tokenizer
    let from_metadata = parameter_estimate.map(|params| params * 4 * 6 / 5);
    let estimated_ram_bytes = from_metadata.unwrap_or_else(|| size_category.required_ram_bytes());
    let fits_in_memory = estimated_ram_bytes <= memory.available_bytes;

    let cpu_only = !accelerator_available || size_category == SizeCategory::XLarge;
    let recommended_device = if cpu_only { "cpu" } else { "auto" }.to_string();
    let quantize = !cpu_only && !fits_in_memory;

    Advisory {
        identifier: identifier.to_string(),
        size_category,
        estimated_ram_bytes,
        estimate_from_metadata: from_metadata.is_some(),
        total_ram_bytes: memory.total_bytes,
        available_ram_bytes: memory.available_bytes,
        fits_in_memory,
        recommended_device,
        recommended_load_in_8bit: quantize && estimated_ram_bytes / 2 <= memory.available_bytes,
        recommended_load_in_4bit: quantize && estimated_ram_bytes / 2 > memory.available_bytes,
        recommended_models: recommended_models(memory.available_bytes),
        cache_size_bytes: None,
    }
}

/// Probes host memory and the local hub cache
#[derive(Debug, Clone, Default)]
pub struct ResourceAdvisor {
    cache_dir: Option<PathBuf>,
}

impl ResourceAdvisor {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self { cache_dir }
    }

    pub fn advise(&self, identifier: &str, accelerator_available: bool) -> Advisory {
        let parameter_estimate = get_model_cache_path_in(self.cache_dir.as_deref(), identifier)
            .and_then(|path| parse_model_config(&path))
            .and_then(|metadata| estimate_parameters(&metadata));

        let mut advisory = advise_with(
            identifier,
            MemorySnapshot::probe(),
            parameter_estimate,
            accelerator_available,
        );
        advisory.cache_size_bytes = get_cache_size_in(self.cache_dir.as_deref(), identifier);
        advisory
    }
}
