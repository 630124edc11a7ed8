//! Model lifecycle manager
//!
//! Owns the single loaded model and serializes every state transition.
//! `deploy`/`undeploy` take the handle lock exclusively, `generate` holds it
//! shared for the whole forward pass, and `status` reads a separate record that
//! is never held across a load.

pub mod generation;
pub mod reconcile;
pub mod spec;
pub mod state;

pub use generation::{GenerationRequest, GenerationResult};
pub use reconcile::{GenerationDefaults, GenerationPlan};
pub use spec::{DeviceRequest, ModelSpec, Precision, ResolvedDevice, ResolvedSpec};
pub use state::{DeployOutcome, FailureRecord, ManagerState, StatusReport, UndeployOutcome};

use crate::advisor::{Advisory, ResourceAdvisor};
use crate::config::ManagerConfig;
use crate::engine::{LanguageModel, LoadRequest, ModelLoader};
use crate::error::{ManagerError, ManagerResult};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// The loaded model together with the spec it was loaded from
struct ModelHandle {
    model: Arc<dyn LanguageModel>,
    resolved: ResolvedSpec,
    loaded_at: DateTime<Utc>,
}

/// Construction options for [`ModelManager`]
#[derive(Clone, Default)]
pub struct ManagerOptions {
    pub defaults: GenerationDefaults,
    /// Hub cache directory; `None` uses the default HF cache
    pub cache_dir: Option<PathBuf>,
    /// Token used for deploys whose spec carries none
    pub hf_token: Option<String>,
}

pub struct ModelManager {
    handle: RwLock<Option<ModelHandle>>,
    status: RwLock<StatusReport>,
    loader: Arc<dyn ModelLoader>,
    advisor: ResourceAdvisor,
    defaults: GenerationDefaults,
    cache_dir: Option<PathBuf>,
    hf_token: Option<String>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn ModelLoader>, options: ManagerOptions) -> Self {
        Self {
            handle: RwLock::new(None),
            status: RwLock::new(StatusReport::default()),
            loader,
            advisor: ResourceAdvisor::new(options.cache_dir.clone()),
            defaults: options.defaults,
            cache_dir: options.cache_dir,
            hf_token: options.hf_token,
        }
    }

    pub fn from_config(config: &ManagerConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self::new(
            loader,
            ManagerOptions {
                defaults: config.generation_defaults(),
                cache_dir: config.cache_dir.clone(),
                hf_token: config.hf_token.clone(),
            },
        )
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Resource advice for `identifier` on this host
    pub fn advise(&self, identifier: &str) -> Advisory {
        self.advisor
            .advise(identifier, self.loader.accelerator_available())
    }

    /// Load `spec`, replacing any model that is currently loaded.
    ///
    /// The previous model is released before the new one is materialized, so
    /// the two never occupy memory together. On failure the manager is left
    /// `Unloaded` with the failure recorded in [`StatusReport::last_error`].
    pub async fn deploy(&self, spec: ModelSpec) -> ManagerResult<DeployOutcome> {
        if spec.identifier.trim().is_empty() {
            return Err(ManagerError::invalid_request("model identifier must not be empty"));
        }

        let accelerator_available = self.loader.accelerator_available();
        let mut resolved = spec.resolve(accelerator_available);
        if !self.loader.supports_quantization() {
            resolved = resolved.without_quantization();
        }
        let identifier = resolved.spec.identifier.clone();

        // Walks the hub cache and probes host memory
        let advisor = self.advisor.clone();
        let advise_id = identifier.clone();
        match tokio::task::spawn_blocking(move || advisor.advise(&advise_id, accelerator_available)).await {
            Ok(advisory) if !advisory.fits_in_memory => {
                tracing::warn!(
                    model = %identifier,
                    estimated_ram_bytes = advisory.estimated_ram_bytes,
                    available_ram_bytes = advisory.available_ram_bytes,
                    recommended_models = ?advisory.recommended_models,
                    "Model may not fit in available memory, loading anyway"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(model = %identifier, error = %e, "Resource advisor failed"),
        }

        let mut handle = self.handle.write().await;

        if let Some(previous) = handle.take() {
            let previous_id = previous.resolved.spec.identifier.clone();
            tracing::info!(
                previous = %previous_id,
                next = %identifier,
                "Releasing current model before deploy"
            );
            Self::release(previous);
            metrics::record_undeploy(&previous_id);
        }

        self.status.write().await.begin_loading(&identifier);
        metrics::set_model_loaded(false);

        tracing::info!(
            model = %identifier,
            revision = %resolved.spec.revision(),
            device = %resolved.device,
            dtype = %resolved.precision,
            load_in_8bit = resolved.spec.load_in_8bit,
            load_in_4bit = resolved.spec.load_in_4bit,
            "Deploying model"
        );

        let started = Instant::now();
        let request = LoadRequest {
            resolved: resolved.clone(),
            cache_dir: self.cache_dir.clone(),
            fallback_token: self.hf_token.clone(),
        };

        let loaded = self.loader.load(&request).await.and_then(|model| {
            if model.precision() == resolved.precision {
                Ok(model)
            } else {
                Err(ManagerError::Unknown {
                    identifier: identifier.clone(),
                    message: format!(
                        "loaded in {} but {} was requested",
                        model.precision(),
                        resolved.precision
                    ),
                })
            }
        });

        match loaded {
            Ok(model) => {
                let loaded_at = Utc::now();
                let footprint_bytes = model.footprint_bytes();
                let architecture = model.architecture().to_string();
                let load_time_secs = started.elapsed().as_secs_f64();

                self.status.write().await.mark_loaded(
                    resolved.spec.clone(),
                    resolved.device,
                    resolved.precision,
                    &architecture,
                    loaded_at,
                    footprint_bytes,
                );

                let outcome = DeployOutcome {
                    identifier: identifier.clone(),
                    device: resolved.device,
                    dtype: resolved.precision,
                    architecture,
                    footprint_bytes,
                    load_time_secs,
                    load_in_8bit: resolved.spec.load_in_8bit,
                    load_in_4bit: resolved.spec.load_in_4bit,
                };

                *handle = Some(ModelHandle {
                    model,
                    resolved,
                    loaded_at,
                });

                metrics::record_deploy(&identifier, "success");
                metrics::set_model_loaded(true);
                tracing::info!(
                    model = %identifier,
                    device = %outcome.device,
                    dtype = %outcome.dtype,
                    footprint_bytes,
                    load_time_secs,
                    "Model deployed"
                );

                Ok(outcome)
            }
            Err(err) => {
                let mut status = self.status.write().await;
                status.mark_failed(&identifier, &err);
                tracing::error!(
                    model = %identifier,
                    kind = err.kind(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Deploy failed"
                );
                metrics::record_deploy(&identifier, err.kind());
                status.mark_unloaded();

                Err(err)
            }
        }
    }

    /// Release the loaded model
    pub async fn undeploy(&self) -> ManagerResult<UndeployOutcome> {
        let mut handle = self.handle.write().await;
        let current = handle.take().ok_or(ManagerError::NothingToUndeploy)?;

        let identifier = current.resolved.spec.identifier.clone();
        let loaded_for = Utc::now() - current.loaded_at;
        let freed_bytes = Self::release(current);

        self.status.write().await.mark_unloaded();
        metrics::record_undeploy(&identifier);
        metrics::set_model_loaded(false);

        tracing::info!(
            model = %identifier,
            freed_bytes = ?freed_bytes,
            loaded_for_secs = loaded_for.num_seconds(),
            "Model undeployed"
        );

        Ok(UndeployOutcome {
            identifier,
            freed_bytes,
        })
    }

    /// Drop a handle, reporting the bytes freed when this was the last owner
    fn release(handle: ModelHandle) -> Option<u64> {
        let footprint = handle.model.footprint_bytes();
        let sole_owner = Arc::strong_count(&handle.model) == 1;
        let identifier = handle.resolved.spec.identifier.clone();
        drop(handle);

        if sole_owner {
            Some(footprint)
        } else {
            tracing::warn!(
                model = %identifier,
                footprint_bytes = footprint,
                "Model weights still referenced after release, memory will be reclaimed later"
            );
            None
        }
    }

    pub async fn status(&self) -> StatusReport {
        self.status.read().await.clone()
    }

    /// Run one generation request against the loaded model
    pub async fn generate(&self, request: GenerationRequest) -> ManagerResult<GenerationResult> {
        request.validate().map_err(ManagerError::invalid_request)?;

        let state = self.status.read().await.state;
        if state != ManagerState::Loaded {
            return Err(ManagerError::InvalidState {
                operation: "generate",
                state,
            });
        }

        let handle = self.handle.read().await;
        let Some(current) = handle.as_ref() else {
            let state = self.status.read().await.state;
            return Err(ManagerError::InvalidState {
                operation: "generate",
                state,
            });
        };

        let identifier = current.resolved.spec.identifier.clone();
        let model = Arc::clone(&current.model);
        let defaults = self.defaults.clone();
        let started = Instant::now();

        tracing::debug!(
            model = %identifier,
            prompt_chars = request.prompt.len(),
            max_length = ?request.max_length,
            max_new_tokens = ?request.max_new_tokens,
            do_sample = request.do_sample,
            num_return_sequences = request.num_return_sequences,
            "Generating"
        );

        let blocking_id = identifier.clone();
        let result = tokio::task::spawn_blocking(move || {
            run_generation(model.as_ref(), &request, &defaults, &blocking_id)
        })
        .await
        .map_err(|e| ManagerError::generation(format!("generation task failed: {e}")))
        .and_then(|r| r);

        // Held until the forward pass finished
        drop(handle);

        let generation_time = started.elapsed().as_secs_f64();

        match result {
            Ok(output) => {
                metrics::record_generation("success", output.output_tokens, generation_time);
                tracing::info!(
                    model = %identifier,
                    input_tokens = output.input_tokens,
                    output_tokens = output.output_tokens,
                    max_new_tokens = output.max_new_tokens,
                    budget_source = ?output.budget_source,
                    variants = output.variants.len(),
                    generation_time,
                    "Generation complete"
                );

                Ok(GenerationResult {
                    model: identifier,
                    variants: output.variants,
                    input_tokens: output.input_tokens,
                    output_tokens: output.output_tokens,
                    max_new_tokens: output.max_new_tokens,
                    generation_time,
                })
            }
            Err(err) => {
                metrics::record_generation(err.kind(), 0, generation_time);
                tracing::warn!(model = %identifier, error = %err, "Generation failed");
                Err(err)
            }
        }
    }
}

struct GenerationOutput {
    variants: Vec<String>,
    input_tokens: usize,
    output_tokens: usize,
    max_new_tokens: usize,
    budget_source: reconcile::BudgetSource,
}

fn generation_failure(identifier: &str, err: anyhow::Error) -> ManagerError {
    let message = format!("{err:#}");
    let lower = message.to_lowercase();
    if lower.contains("out of memory") || lower.contains("cannot allocate") {
        ManagerError::OutOfMemory {
            identifier: identifier.to_string(),
            message,
        }
    } else {
        ManagerError::GenerationError { message }
    }
}

/// Tokenize, reconcile, generate and decode. Blocking.
fn run_generation(
    model: &dyn LanguageModel,
    request: &GenerationRequest,
    defaults: &GenerationDefaults,
    identifier: &str,
) -> ManagerResult<GenerationOutput> {
    let fail = |err: anyhow::Error| generation_failure(identifier, err);

    let bound = reconcile::truncation_bound(request, model.context_window(), defaults);
    let input_ids = model.encode(&request.prompt, bound).map_err(fail)?;
    if input_ids.is_empty() {
        return Err(ManagerError::generation("prompt produced no tokens"));
    }

    let plan = reconcile::reconcile(request, input_ids.len(), defaults);
    let prompt_text = model.decode(&input_ids).map_err(fail)?;

    let mut variants = Vec::with_capacity(plan.num_return_sequences);
    let mut output_tokens = 0;

    for variant in 0..plan.num_return_sequences {
        let mut generated = model.generate(&input_ids, &plan, variant).map_err(fail)?;
        generated.truncate(plan.max_new_tokens);
        output_tokens += generated.len();

        let full: Vec<u32> = input_ids.iter().chain(generated.iter()).copied().collect();
        let decoded = model.decode(&full).map_err(fail)?;
        let text = match decoded.strip_prefix(prompt_text.as_str()) {
            Some(rest) => rest.to_string(),
            None => model.decode(&generated).map_err(fail)?,
        };
        variants.push(text.trim().to_string());
    }

    Ok(GenerationOutput {
        variants,
        input_tokens: input_ids.len(),
        output_tokens,
        max_new_tokens: plan.max_new_tokens,
        budget_source: plan.budget_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mocks::{MockLoader, MockModel};
    use std::time::Duration;

    fn manager_with(loader: MockLoader) -> (Arc<ModelManager>, Arc<MockLoader>) {
        let loader = Arc::new(loader);
        let manager = ModelManager::new(loader.clone(), ManagerOptions::default());
        (Arc::new(manager), loader)
    }

    fn manager() -> Arc<ModelManager> {
        manager_with(MockLoader::default()).0
    }

    fn greedy(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            do_sample: false,
            ..GenerationRequest::new(prompt)
        }
    }

    #[tokio::test]
    async fn test_deploy_on_cpu_disables_quantization() {
        let (manager, loader) = manager_with(MockLoader::default());
        let spec = ModelSpec {
            load_in_8bit: true,
            load_in_4bit: true,
            ..ModelSpec::new("org/small-model")
        };

        let outcome = manager.deploy(spec).await.unwrap();
        assert_eq!(outcome.device, ResolvedDevice::Cpu);
        assert_eq!(outcome.dtype, Precision::F32);
        assert!(!outcome.load_in_8bit);
        assert!(!outcome.load_in_4bit);

        let status = manager.status().await;
        let active = status.spec.unwrap();
        assert!(!active.load_in_8bit);
        assert!(!active.load_in_4bit);

        let request = loader.last_request.lock().unwrap().clone().unwrap();
        assert!(!request.resolved.spec.load_in_8bit);
        assert!(!request.resolved.spec.load_in_4bit);
    }

    #[tokio::test]
    async fn test_accelerator_keeps_four_bit_only() {
        let (manager, _) = manager_with(MockLoader {
            accelerator: true,
            ..Default::default()
        });
        let spec = ModelSpec {
            device: DeviceRequest::Auto,
            load_in_8bit: true,
            load_in_4bit: true,
            ..ModelSpec::new("org/small-model")
        };

        let outcome = manager.deploy(spec).await.unwrap();
        assert_eq!(outcome.device, ResolvedDevice::Cuda(0));
        assert_eq!(outcome.dtype, Precision::F16);
        assert!(outcome.load_in_4bit);
        assert!(!outcome.load_in_8bit);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let manager = manager();
        let err = manager.deploy(ModelSpec::new("  ")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidRequest { .. }));
        assert_eq!(manager.status().await.state, ManagerState::Unloaded);
    }

    #[tokio::test]
    async fn test_generate_while_unloaded() {
        let manager = manager();
        let err = manager.generate(GenerationRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::InvalidState {
                operation: "generate",
                state: ManagerState::Unloaded
            }
        ));
    }

    #[tokio::test]
    async fn test_generate_while_loading_and_status_stays_available() {
        let (manager, _) = manager_with(MockLoader {
            load_delay: Duration::from_millis(300),
            ..Default::default()
        });

        let deploying = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.deploy(ModelSpec::new("org/slow-model")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = tokio::time::timeout(Duration::from_millis(100), manager.status())
            .await
            .expect("status must not wait for the deploy");
        assert_eq!(status.state, ManagerState::Loading);
        assert_eq!(status.loading_identifier.as_deref(), Some("org/slow-model"));

        let err = manager.generate(GenerationRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::InvalidState {
                state: ManagerState::Loading,
                ..
            }
        ));

        deploying.await.unwrap().unwrap();
        assert_eq!(manager.status().await.state, ManagerState::Loaded);
    }

    #[tokio::test]
    async fn test_undeploy_resets_status() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let outcome = manager.undeploy().await.unwrap();
        assert_eq!(outcome.identifier, "org/a");
        assert_eq!(outcome.freed_bytes, Some(1024 * 1024));

        let status = manager.status().await;
        assert_eq!(status.state, ManagerState::Unloaded);
        assert!(status.spec.is_none());
        assert!(status.device.is_none());
        assert!(status.footprint_bytes.is_none());
    }

    #[tokio::test]
    async fn test_undeploy_with_nothing_loaded() {
        let manager = manager();
        let err = manager.undeploy().await.unwrap_err();
        assert!(matches!(err, ManagerError::NothingToUndeploy));
    }

    #[tokio::test]
    async fn test_redeploy_replaces_model() {
        let (manager, loader) = manager_with(MockLoader::default());
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();
        manager.deploy(ModelSpec::new("org/b")).await.unwrap();

        let status = manager.status().await;
        assert_eq!(status.state, ManagerState::Loaded);
        assert_eq!(status.spec.unwrap().identifier, "org/b");
        assert_eq!(loader.load_count(), 2);

        let result = manager.generate(greedy("Hello")).await.unwrap();
        assert_eq!(result.model, "org/b");
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let manager = manager();

        manager.deploy(ModelSpec::new("org/a")).await.unwrap();
        let first = manager.generate(GenerationRequest::new("Hello there")).await.unwrap();
        assert!(first.output_tokens > 0);

        manager.undeploy().await.unwrap();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();
        let second = manager.generate(GenerationRequest::new("Hello there")).await.unwrap();
        assert!(second.output_tokens > 0);
        assert_eq!(second.input_tokens, 2);
    }

    #[tokio::test]
    async fn test_max_length_budget_for_single_token_prompt() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let request = GenerationRequest {
            max_length: Some(5),
            ..greedy("Hello")
        };
        let result = manager.generate(request).await.unwrap();

        assert_eq!(result.input_tokens, 1);
        assert_eq!(result.max_new_tokens, 4);
        assert_eq!(result.variants.len(), 1);
        assert!(result.output_tokens <= 4);
        assert_eq!(result.variants[0], "v0tok0 v0tok1 v0tok2 v0tok3");
    }

    #[tokio::test]
    async fn test_forward_progress_past_max_length() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let request = GenerationRequest {
            max_length: Some(2),
            ..greedy("one two three")
        };
        let result = manager.generate(request).await.unwrap();

        // Truncated to the bound, then one token of progress
        assert_eq!(result.input_tokens, 2);
        assert_eq!(result.max_new_tokens, 1);
        assert_eq!(result.output_tokens, 1);
    }

    #[tokio::test]
    async fn test_variants_sum_output_tokens() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let request = GenerationRequest {
            max_new_tokens: Some(3),
            num_return_sequences: 2,
            ..GenerationRequest::new("Hello")
        };
        let result = manager.generate(request).await.unwrap();

        assert_eq!(result.variants, vec!["v0tok0 v0tok1 v0tok2", "v1tok0 v1tok1 v1tok2"]);
        assert_eq!(result.output_tokens, 6);
    }

    #[tokio::test]
    async fn test_gated_model_without_token() {
        let manager = manager();
        let err = manager
            .deploy(ModelSpec::new("meta-llama/Llama-2-7b-hf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::AccessDenied { .. }));

        let status = manager.status().await;
        assert_eq!(status.state, ManagerState::Unloaded);
        let failure = status.last_error.unwrap();
        assert_eq!(failure.kind, "access_denied");
        assert_eq!(failure.identifier, "meta-llama/Llama-2-7b-hf");
    }

    #[tokio::test]
    async fn test_gated_model_with_configured_token() {
        let loader = Arc::new(MockLoader::default());
        let manager = ModelManager::new(
            loader,
            ManagerOptions {
                hf_token: Some("hf_test".to_string()),
                ..Default::default()
            },
        );
        manager
            .deploy(ModelSpec::new("meta-llama/Llama-2-7b-hf"))
            .await
            .unwrap();
        assert_eq!(manager.status().await.state, ManagerState::Loaded);
    }

    #[tokio::test]
    async fn test_failed_deploy_releases_previous_model() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let err = manager
            .deploy(ModelSpec::new("nobody/does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));

        let status = manager.status().await;
        assert_eq!(status.state, ManagerState::Unloaded);
        assert!(status.spec.is_none());
        assert!(matches!(
            manager.undeploy().await,
            Err(ManagerError::NothingToUndeploy)
        ));

        // A corrected retry always works
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();
        assert!(manager.status().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_model_loaded() {
        let (manager, _) = manager_with(MockLoader {
            fail_generation: true,
            ..Default::default()
        });
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let err = manager.generate(GenerationRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(err, ManagerError::GenerationError { .. }));
        assert_eq!(manager.status().await.state, ManagerState::Loaded);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_state_check() {
        let manager = manager();
        let err = manager.generate(GenerationRequest::new("")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_generations() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let request = GenerationRequest {
                        max_new_tokens: Some(2),
                        ..greedy(&format!("prompt number {i}"))
                    };
                    manager.generate(request).await
                })
            })
            .collect();

        for task in tasks {
            let result = task.await.unwrap().unwrap();
            assert_eq!(result.output_tokens, 2);
        }
    }

    #[tokio::test]
    async fn test_undeploy_waits_for_inflight_generation() {
        let (manager, _) = manager_with(MockLoader {
            generate_delay: Duration::from_millis(200),
            ..Default::default()
        });
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let generating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.generate(greedy("Hello")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let outcome = manager.undeploy().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(generating.is_finished());

        // The generation held the only other reference and has dropped it
        assert_eq!(outcome.freed_bytes, Some(1024 * 1024));
        let result = generating.await.unwrap().unwrap();
        assert_eq!(result.model, "org/a");
        assert_eq!(manager.status().await.state, ManagerState::Unloaded);
    }

    #[tokio::test]
    async fn test_redeploy_waits_for_inflight_generation() {
        let (manager, loader) = manager_with(MockLoader {
            generate_delay: Duration::from_millis(200),
            ..Default::default()
        });
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let generating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.generate(greedy("Hello")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.deploy(ModelSpec::new("org/b")).await.unwrap();
        assert!(generating.is_finished());
        assert_eq!(generating.await.unwrap().unwrap().model, "org/a");
        assert_eq!(loader.load_count(), 2);
        assert_eq!(manager.status().await.spec.unwrap().identifier, "org/b");
    }

    #[tokio::test]
    async fn test_oversized_budget_rejected_and_model_stays_usable() {
        let manager = manager();
        manager.deploy(ModelSpec::new("org/a")).await.unwrap();

        let request = GenerationRequest {
            max_new_tokens: Some(usize::MAX),
            ..greedy("Hello")
        };
        let err = manager.generate(request).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidRequest { .. }));

        let result = manager.generate(greedy("Hello")).await.unwrap();
        assert!(result.output_tokens > 0);
        assert_eq!(manager.status().await.state, ManagerState::Loaded);
    }

    #[tokio::test]
    async fn test_unsupported_quantization_is_not_reported() {
        let (manager, loader) = manager_with(MockLoader {
            accelerator: true,
            quantization: false,
            ..Default::default()
        });
        let spec = ModelSpec {
            device: DeviceRequest::Auto,
            load_in_8bit: true,
            ..ModelSpec::new("org/small-model")
        };

        let outcome = manager.deploy(spec).await.unwrap();
        assert_eq!(outcome.device, ResolvedDevice::Cuda(0));
        assert!(!outcome.load_in_8bit);
        assert!(!outcome.load_in_4bit);

        let active = manager.status().await.spec.unwrap();
        assert!(!active.load_in_8bit);
        assert!(!active.load_in_4bit);

        let request = loader.last_request.lock().unwrap().clone().unwrap();
        assert!(!request.resolved.is_quantized());
    }

    #[tokio::test]
    async fn test_deploy_with_cached_oversized_model() {
        let temp = tempfile::TempDir::new().unwrap();
        let snapshot = temp.path().join("models--org--huge/snapshots/rev");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(
            snapshot.join("config.json"),
            r#"{"model_type": "llama", "hidden_size": 65536, "num_hidden_layers": 512, "vocab_size": 256000}"#,
        )
        .unwrap();

        let manager = ModelManager::new(
            Arc::new(MockLoader::default()),
            ManagerOptions {
                cache_dir: Some(temp.path().to_path_buf()),
                ..Default::default()
            },
        );
        assert!(!manager.advise("org/huge").fits_in_memory);

        // Advice is logged, never enforced
        manager.deploy(ModelSpec::new("org/huge")).await.unwrap();
        assert_eq!(manager.status().await.state, ManagerState::Loaded);
    }

    #[test]
    fn test_run_generation_falls_back_to_generated_tokens() {
        struct PrefixChanging(MockModel);

        impl LanguageModel for PrefixChanging {
            fn encode(&self, text: &str, max_tokens: usize) -> anyhow::Result<Vec<u32>> {
                self.0.encode(text, max_tokens)
            }
            fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
                // Decoding a longer sequence changes how the prompt renders
                let text = self.0.decode(ids)?;
                Ok(if ids.len() > 1 { text.to_uppercase() } else { text })
            }
            fn generate(&self, ids: &[u32], plan: &GenerationPlan, variant: usize) -> anyhow::Result<Vec<u32>> {
                self.0.generate(ids, plan, variant)
            }
            fn context_window(&self) -> Option<usize> {
                self.0.context_window()
            }
            fn precision(&self) -> Precision {
                self.0.precision()
            }
            fn footprint_bytes(&self) -> u64 {
                self.0.footprint_bytes()
            }
            fn architecture(&self) -> &str {
                self.0.architecture()
            }
        }

        let model = PrefixChanging(MockModel::new(Precision::F32));
        let request = GenerationRequest {
            max_new_tokens: Some(1),
            ..greedy("hello")
        };
        let output = run_generation(&model, &request, &GenerationDefaults::default(), "org/a").unwrap();
        assert_eq!(output.variants, vec!["v0tok0"]);
    }

    #[test]
    fn test_generation_failure_classifies_oom() {
        let err = generation_failure("org/a", anyhow::anyhow!("CUDA_ERROR_OUT_OF_MEMORY: out of memory"));
        assert!(matches!(err, ManagerError::OutOfMemory { .. }));

        let err = generation_failure("org/a", anyhow::anyhow!("shape mismatch"));
        assert!(matches!(err, ManagerError::GenerationError { .. }));
    }
}
