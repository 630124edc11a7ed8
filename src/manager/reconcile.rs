//! Generation parameter reconciliation
//!
//! A request may carry `max_length` (total sequence length), `max_new_tokens`
//! (output length), both, or neither. The backend only ever receives a single
//! output budget, computed here on every call.

use super::generation::GenerationRequest;
use serde::{Deserialize, Serialize};

/// Defaults applied when a request leaves a field unset
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    /// Truncation bound when neither the request nor the model provides one
    pub max_length: usize,
    /// Output budget when the request sets neither `max_length` nor `max_new_tokens`
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub seed: u64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_length: 512,
            max_new_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            seed: 299_792_458,
        }
    }
}

/// Sampling controls forwarded only when sampling is enabled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
}

/// Where the output budget came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSource {
    MaxNewTokens,
    MaxLength,
    Default,
}

/// Fully resolved parameters for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPlan {
    pub max_new_tokens: usize,
    pub budget_source: BudgetSource,
    /// `None` means greedy decoding
    pub sampling: Option<SamplingParams>,
    pub num_return_sequences: usize,
    pub seed: u64,
}

/// Bound applied when tokenizing the prompt.
///
/// `max_length` when given, else the model context window, else the configured
/// default; never larger than a known context window.
pub fn truncation_bound(
    request: &GenerationRequest,
    context_window: Option<usize>,
    defaults: &GenerationDefaults,
) -> usize {
    let bound = request
        .max_length
        .or(context_window)
        .unwrap_or(defaults.max_length);

    match context_window {
        Some(window) => bound.min(window),
        None => bound,
    }
    .max(1)
}

/// Resolve the single output budget for a prompt of `input_tokens` tokens.
///
/// With only `max_length` set the budget is `max(1, max_length - input_tokens)`:
/// at least one token is always generated, even past the requested total.
pub fn output_budget(
    request: &GenerationRequest,
    input_tokens: usize,
    defaults: &GenerationDefaults,
) -> (usize, BudgetSource) {
    if let Some(max_new_tokens) = request.max_new_tokens {
        (max_new_tokens, BudgetSource::MaxNewTokens)
    } else if let Some(max_length) = request.max_length {
        (
            max_length.saturating_sub(input_tokens).max(1),
            BudgetSource::MaxLength,
        )
    } else {
        (defaults.max_new_tokens.max(1), BudgetSource::Default)
    }
}

/// Build the plan handed to the backend
pub fn reconcile(
    request: &GenerationRequest,
    input_tokens: usize,
    defaults: &GenerationDefaults,
) -> GenerationPlan {
    let (max_new_tokens, budget_source) = output_budget(request, input_tokens, defaults);

    let sampling = request.do_sample.then(|| SamplingParams {
        temperature: request.temperature.unwrap_or(defaults.temperature),
        top_p: request.top_p.unwrap_or(defaults.top_p),
        top_k: request.top_k.unwrap_or(defaults.top_k),
    });

    GenerationPlan {
        max_new_tokens,
        budget_source,
        sampling,
        num_return_sequences: request.num_return_sequences.max(1),
        seed: request.seed.unwrap_or(defaults.seed),
    }
}
