//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use llm_deploy::manager::reconcile::{
    BudgetSource, GenerationDefaults, output_budget, reconcile, truncation_bound,
};
use llm_deploy::{DeviceRequest, GenerationRequest, ManagerConfig, ModelSpec, Precision};
use proptest::prelude::*;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

/// Requests with any combination of optional parameters set
fn arb_request() -> impl Strategy<Value = GenerationRequest> {
    (
        prop::option::of(1usize..4096),  // max_length
        prop::option::of(1usize..1024),  // max_new_tokens
        prop::option::of(0.0f64..2.0),   // temperature
        prop::option::of(0.01f64..1.0),  // top_p
        prop::option::of(0usize..200),   // top_k
        any::<bool>(),                   // do_sample
        1usize..5,                       // num_return_sequences
    )
        .prop_map(
            |(max_length, max_new_tokens, temperature, top_p, top_k, do_sample, num_return_sequences)| {
                GenerationRequest {
                    max_length,
                    max_new_tokens,
                    temperature,
                    top_p,
                    top_k,
                    do_sample,
                    num_return_sequences,
                    ..GenerationRequest::new("Hello")
                }
            },
        )
}

/// Generate ManagerConfig values that pass validation
fn arb_manager_config() -> impl Strategy<Value = ManagerConfig> {
    (
        1024u16..60000,  // api_port
        1usize..8192,    // default_max_length
        1usize..2048,    // default_max_new_tokens
        0.0f64..2.0,     // default_temperature
        0.01f64..1.0,    // default_top_p
        0usize..200,     // default_top_k
        0u64..i64::MAX as u64, // default_seed (TOML integers are i64)
    )
        .prop_map(
            |(api_port, max_length, max_new_tokens, temperature, top_p, top_k, seed)| ManagerConfig {
                api_port,
                default_max_length: max_length,
                default_max_new_tokens: max_new_tokens,
                default_temperature: temperature,
                default_top_p: top_p,
                default_top_k: top_k,
                default_seed: seed,
                ..Default::default()
            },
        )
}

// =============================================================================
// Reconciler Invariants
// =============================================================================

proptest! {
    /// Exactly one budget reaches the backend and it is never zero
    #[test]
    fn budget_is_positive(request in arb_request(), input_tokens in 0usize..4096) {
        let defaults = GenerationDefaults::default();
        let plan = reconcile(&request, input_tokens, &defaults);
        prop_assert!(plan.max_new_tokens >= 1);
        prop_assert!(plan.num_return_sequences >= 1);
    }

    /// Explicit max_new_tokens always wins over max_length
    #[test]
    fn explicit_budget_wins(request in arb_request(), n in 1usize..1024, input_tokens in 0usize..4096) {
        let request = GenerationRequest { max_new_tokens: Some(n), ..request };
        let (budget, source) = output_budget(&request, input_tokens, &GenerationDefaults::default());
        prop_assert_eq!(budget, n);
        prop_assert_eq!(source, BudgetSource::MaxNewTokens);
    }

    /// Only max_length set: budget is max(1, L - t)
    #[test]
    fn max_length_budget(length in 1usize..4096, input_tokens in 0usize..4096) {
        let request = GenerationRequest {
            max_length: Some(length),
            ..GenerationRequest::new("Hello")
        };
        let (budget, source) = output_budget(&request, input_tokens, &GenerationDefaults::default());
        prop_assert_eq!(budget, length.saturating_sub(input_tokens).max(1));
        prop_assert_eq!(source, BudgetSource::MaxLength);
    }

    /// Greedy requests never carry sampling parameters
    #[test]
    fn greedy_drops_sampling(request in arb_request(), input_tokens in 0usize..512) {
        let request = GenerationRequest { do_sample: false, ..request };
        let plan = reconcile(&request, input_tokens, &GenerationDefaults::default());
        prop_assert!(plan.sampling.is_none());
    }

    /// Truncation never exceeds a known context window
    #[test]
    fn truncation_within_context(request in arb_request(), window in 1usize..8192) {
        let bound = truncation_bound(&request, Some(window), &GenerationDefaults::default());
        prop_assert!(bound >= 1);
        prop_assert!(bound <= window);
    }
}

// =============================================================================
// Model Spec Normalization Invariants
// =============================================================================

proptest! {
    /// CPU targets never keep quantization and always run in f32
    #[test]
    fn cpu_disables_quantization(
        load_in_8bit in any::<bool>(),
        load_in_4bit in any::<bool>(),
        accelerator in any::<bool>(),
        dtype in prop::option::of(prop_oneof![
            Just(Precision::F32),
            Just(Precision::F16),
            Just(Precision::Bf16),
        ]),
    ) {
        let spec = ModelSpec {
            device: DeviceRequest::Cpu,
            load_in_8bit,
            load_in_4bit,
            dtype,
            ..ModelSpec::new("org/model")
        };
        let resolved = spec.resolve(accelerator);
        prop_assert!(!resolved.spec.load_in_8bit);
        prop_assert!(!resolved.spec.load_in_4bit);
        prop_assert_eq!(resolved.precision, Precision::F32);
    }

    /// At most one quantization mode survives on an accelerator
    #[test]
    fn single_quantization_mode(load_in_8bit in any::<bool>(), load_in_4bit in any::<bool>()) {
        let spec = ModelSpec {
            device: DeviceRequest::Auto,
            load_in_8bit,
            load_in_4bit,
            ..ModelSpec::new("org/model")
        };
        let resolved = spec.resolve(true);
        prop_assert!(!(resolved.spec.load_in_8bit && resolved.spec.load_in_4bit));
        prop_assert_eq!(resolved.spec.load_in_4bit, load_in_4bit);
    }
}

// =============================================================================
// Config Serialization Round-Trip Tests
// =============================================================================

proptest! {
    /// ManagerConfig serializes to TOML and deserializes back
    #[test]
    fn manager_config_roundtrip(config in arb_manager_config()) {
        prop_assert!(config.validate().is_ok());

        let toml_str = toml::to_string(&config).expect("Failed to serialize to TOML");
        let parsed: ManagerConfig = toml::from_str(&toml_str).expect("Failed to parse TOML");

        prop_assert_eq!(config.api_port, parsed.api_port);
        prop_assert_eq!(config.generation_defaults(), parsed.generation_defaults());
    }
}
