//! Candle backend
//!
//! Loads safetensors checkpoints fetched through hf-hub and runs them with
//! candle-transformers. Supported architectures are read from the
//! `model_type` field of `config.json`.

use super::{LanguageModel, LoadRequest, ModelLoader};
use crate::error::ManagerError;
use crate::manager::reconcile::GenerationPlan;
use crate::manager::spec::{Precision, ResolvedDevice, ResolvedSpec};
use crate::models::{DownloadRequest, HfModelMetadata, ModelFiles, download_model, parse_config_str};
use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::{llama, mistral, qwen2};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

/// Special tokens that end a sequence in the tokenizers we support
const EOS_TOKENS: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>", "<|eot_id|>"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Llama,
    Mistral,
    Qwen2,
}

impl Architecture {
    pub fn from_model_type(model_type: &str) -> Option<Self> {
        match model_type {
            "llama" => Some(Self::Llama),
            "mistral" => Some(Self::Mistral),
            "qwen2" => Some(Self::Qwen2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llama => "llama",
            Self::Mistral => "mistral",
            Self::Qwen2 => "qwen2",
        }
    }
}

pub fn dtype_for(precision: Precision) -> DType {
    match precision {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
    }
}

/// Map a generation plan onto candle's sampling strategies
pub fn sampling_for(plan: &GenerationPlan) -> Sampling {
    let Some(params) = plan.sampling else {
        return Sampling::ArgMax;
    };
    let temperature = params.temperature;
    if temperature <= 0.0 {
        return Sampling::ArgMax;
    }

    let top_k = (params.top_k > 0).then_some(params.top_k);
    let top_p = (params.top_p < 1.0).then_some(params.top_p);
    match (top_k, top_p) {
        (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        (Some(k), None) => Sampling::TopK { k, temperature },
        (None, Some(p)) => Sampling::TopP { p, temperature },
        (None, None) => Sampling::All { temperature },
    }
}

/// Resident size of `stored_bytes` of weights once cast to `target`
pub fn scaled_footprint(stored_bytes: u64, stored: Precision, target: Precision) -> u64 {
    stored_bytes * target.bytes_per_element() / stored.bytes_per_element()
}

/// Loads models with candle on CPU or CUDA
#[derive(Debug, Clone)]
pub struct CandleLoader {
    accelerator: bool,
}

impl CandleLoader {
    pub fn new() -> Self {
        let accelerator = candle_core::utils::cuda_is_available();
        tracing::info!(cuda = accelerator, "Candle backend initialized");
        Self { accelerator }
    }
}

impl Default for CandleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelLoader for CandleLoader {
    fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    // Safetensors checkpoints are always materialized at full or half precision
    fn supports_quantization(&self) -> bool {
        false
    }

    async fn load(&self, request: &LoadRequest) -> Result<Arc<dyn LanguageModel>, ManagerError> {
        let resolved = request.resolved.clone();
        let identifier = request.identifier().to_string();

        if resolved.spec.trust_remote_code {
            tracing::info!(
                model = %identifier,
                "trust_remote_code has no effect, architectures are implemented natively"
            );
        }

        let files = download_model(DownloadRequest {
            model_id: &identifier,
            revision: resolved.spec.revision(),
            token: request.token(),
            cache_dir: request.cache_dir.clone(),
        })
        .await?;

        let blocking_id = identifier.clone();
        let model = tokio::task::spawn_blocking(move || CandleModel::load(&blocking_id, &files, &resolved))
            .await
            .map_err(|e| ManagerError::Unknown {
                identifier: identifier.clone(),
                message: format!("model load task failed: {e}"),
            })??;

        Ok(Arc::new(model))
    }
}

enum Backend {
    Llama {
        model: llama::Llama,
        config: llama::Config,
        cache: llama::Cache,
    },
    Mistral(mistral::Model),
    Qwen2(qwen2::ModelForCausalLM),
}

impl Backend {
    /// Drop all KV state so the next forward starts a fresh sequence
    fn reset(&mut self, dtype: DType, device: &Device) -> candle_core::Result<()> {
        match self {
            Self::Llama { config, cache, .. } => {
                *cache = llama::Cache::new(true, dtype, config, device)?;
            }
            Self::Mistral(model) => model.clear_kv_cache(),
            Self::Qwen2(model) => model.clear_kv_cache(),
        }
        Ok(())
    }

    /// Logits for the last position as a 1-D f32 tensor
    fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
        let logits = match self {
            Self::Llama { model, cache, .. } => model.forward(input, offset, cache)?,
            Self::Mistral(model) => model.forward(input, offset)?,
            Self::Qwen2(model) => model.forward(input, offset)?,
        };
        logits.flatten_all()?.to_dtype(DType::F32)
    }
}

pub struct CandleModel {
    // KV caches are mutated by every forward pass
    backend: Mutex<Backend>,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    precision: Precision,
    architecture: Architecture,
    eos_token_ids: Vec<u32>,
    context_window: Option<usize>,
    footprint_bytes: u64,
}

impl CandleModel {
    fn load(identifier: &str, files: &ModelFiles, resolved: &ResolvedSpec) -> Result<Self, ManagerError> {
        let unsupported = |message: String| ManagerError::UnsupportedModel {
            identifier: identifier.to_string(),
            message,
        };
        let failed = |err: String| ManagerError::classify_load_failure(identifier, err);

        let config_json = std::fs::read_to_string(&files.config).map_err(|e| failed(e.to_string()))?;
        let metadata = parse_config_str(&config_json)
            .ok_or_else(|| unsupported("config.json could not be parsed".to_string()))?;
        let model_type = metadata.model_type.clone().unwrap_or_default();
        let architecture = Architecture::from_model_type(&model_type)
            .ok_or_else(|| unsupported(format!("architecture '{model_type}' is not supported")))?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| failed(e.to_string()))?;
        let device = match resolved.device {
            ResolvedDevice::Cpu => Device::Cpu,
            ResolvedDevice::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| failed(e.to_string()))?,
        };
        let dtype = dtype_for(resolved.precision);

        tracing::debug!(
            model = %identifier,
            architecture = architecture.as_str(),
            weight_files = files.weights.len(),
            "Mapping safetensors"
        );

        // SAFETY: the weight files live in the hub cache and are not modified
        // while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device) }
            .map_err(|e| failed(e.to_string()))?;

        let backend = build_backend(architecture, &config_json, vb, dtype, &device)
            .map_err(|e| failed(format!("{e:#}")))?;

        let stored = metadata
            .torch_dtype
            .as_deref()
            .and_then(Precision::from_torch_dtype)
            .unwrap_or(Precision::F32);
        let footprint_bytes = scaled_footprint(files.weights_size_bytes(), stored, resolved.precision);

        let eos_token_ids = eos_token_ids(&metadata, &tokenizer);
        if eos_token_ids.is_empty() {
            tracing::warn!(model = %identifier, "No EOS token found, generation always runs to budget");
        }

        Ok(Self {
            backend: Mutex::new(backend),
            tokenizer,
            device,
            dtype,
            precision: resolved.precision,
            architecture,
            eos_token_ids,
            context_window: metadata.max_position_embeddings.map(|n| n as usize),
            footprint_bytes,
        })
    }
}

fn build_backend(
    architecture: Architecture,
    config_json: &str,
    vb: VarBuilder,
    dtype: DType,
    device: &Device,
) -> Result<Backend> {
    let backend = match architecture {
        Architecture::Llama => {
            let raw: llama::LlamaConfig =
                serde_json::from_str(config_json).context("invalid llama config")?;
            let config = raw.into_config(false);
            let cache = llama::Cache::new(true, dtype, &config, device)?;
            let model = llama::Llama::load(vb, &config)?;
            Backend::Llama {
                model,
                config,
                cache,
            }
        }
        Architecture::Mistral => {
            let config: mistral::Config =
                serde_json::from_str(config_json).context("invalid mistral config")?;
            Backend::Mistral(mistral::Model::new(&config, vb)?)
        }
        Architecture::Qwen2 => {
            let config: qwen2::Config =
                serde_json::from_str(config_json).context("invalid qwen2 config")?;
            Backend::Qwen2(qwen2::ModelForCausalLM::new(&config, vb)?)
        }
    };
    Ok(backend)
}

/// EOS ids from config.json plus any well-known end token in the vocabulary
fn eos_token_ids(metadata: &HfModelMetadata, tokenizer: &Tokenizer) -> Vec<u32> {
    let mut ids = metadata.eos_token_ids.clone();
    for token in EOS_TOKENS {
        if let Some(id) = tokenizer.token_to_id(token)
            && !ids.contains(&id)
        {
            ids.push(id);
        }
    }
    ids
}

impl LanguageModel for CandleModel {
    fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(anyhow::Error::msg)
            .context("tokenization failed")?;
        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(max_tokens);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(anyhow::Error::msg)
            .context("detokenization failed")
    }

    fn generate(&self, input_ids: &[u32], plan: &GenerationPlan, variant: usize) -> Result<Vec<u32>> {
        // A panicked generation leaves stale KV state behind, which reset clears
        let mut backend = self.backend.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(
                architecture = self.architecture.as_str(),
                "Recovering model state after a panicked generation"
            );
            self.backend.clear_poison();
            poisoned.into_inner()
        });
        backend.reset(self.dtype, &self.device)?;

        let mut processor =
            LogitsProcessor::from_sampling(plan.seed.wrapping_add(variant as u64), sampling_for(plan));

        let mut generated = Vec::new();
        let mut pending: Vec<u32> = input_ids.to_vec();
        let mut offset = 0;

        while generated.len() < plan.max_new_tokens {
            if !generated.is_empty()
                && let Some(window) = self.context_window
                && offset >= window
            {
                break;
            }

            let input = Tensor::new(pending.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = backend.forward(&input, offset)?;
            offset += pending.len();

            let token = processor.sample(&logits)?;
            generated.push(token);
            if self.eos_token_ids.contains(&token) {
                break;
            }
            pending = vec![token];
        }

        Ok(generated)
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn footprint_bytes(&self) -> u64 {
        self.footprint_bytes
    }

    fn architecture(&self) -> &str {
        self.architecture.as_str()
    }
}
