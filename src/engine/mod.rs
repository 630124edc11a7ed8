//! Inference backends driven by the model manager
//!
//! The manager only talks to [`ModelLoader`] and [`LanguageModel`]; the
//! production implementation is [`candle::CandleLoader`].

pub mod candle;

use crate::error::ManagerError;
use crate::manager::reconcile::GenerationPlan;
use crate::manager::spec::{Precision, ResolvedSpec};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use self::candle::CandleLoader;

/// Everything a loader needs to materialize one model
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub resolved: ResolvedSpec,
    /// Local hub cache directory; `None` uses the default HF cache
    pub cache_dir: Option<PathBuf>,
    /// Token used when the spec does not carry one
    pub fallback_token: Option<String>,
}

impl LoadRequest {
    pub fn identifier(&self) -> &str {
        &self.resolved.spec.identifier
    }

    pub fn token(&self) -> Option<&str> {
        self.resolved
            .spec
            .token
            .as_deref()
            .or(self.fallback_token.as_deref())
    }
}

/// Materializes tokenizer + weights for a spec
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Whether `auto`/`cuda` device requests can be honored
    fn accelerator_available(&self) -> bool;

    /// Whether `load_in_8bit`/`load_in_4bit` are honored on an accelerator.
    /// When not, the manager clears both flags before loading.
    fn supports_quantization(&self) -> bool {
        false
    }

    /// Download (or reuse from cache) and instantiate a model
    async fn load(&self, request: &LoadRequest) -> Result<Arc<dyn LanguageModel>, ManagerError>;
}

/// A loaded causal language model with its tokenizer.
///
/// Methods are blocking; the manager calls them from `spawn_blocking`.
pub trait LanguageModel: Send + Sync {
    /// Tokenize `text`, keeping at most `max_tokens` ids
    fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Generate one continuation of `input_ids`.
    ///
    /// Returns only the new tokens: at least one, at most `plan.max_new_tokens`.
    /// `variant` distinguishes return sequences of the same request.
    fn generate(&self, input_ids: &[u32], plan: &GenerationPlan, variant: usize) -> Result<Vec<u32>>;

    /// Maximum sequence length the model supports, when known
    fn context_window(&self) -> Option<usize>;

    fn precision(&self) -> Precision;

    /// Approximate resident size of the weights in bytes
    fn footprint_bytes(&self) -> u64;

    fn architecture(&self) -> &str;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
