//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

const GENERATION_SECONDS_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("llm_deploy_generation_seconds".to_string()),
            GENERATION_SECONDS_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("Invalid histogram buckets: {}", e))?
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a deploy attempt; `outcome` is "success" or an error kind
pub fn record_deploy(model_id: &str, outcome: &str) {
    metrics::counter!("llm_deploy_deploys_total",
        "model" => model_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_undeploy(model_id: &str) {
    metrics::counter!("llm_deploy_undeploys_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a finished generation call
pub fn record_generation(outcome: &str, output_tokens: usize, seconds: f64) {
    metrics::counter!("llm_deploy_generations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if output_tokens > 0 {
        metrics::counter!("llm_deploy_generated_tokens_total").increment(output_tokens as u64);
    }
    metrics::histogram!("llm_deploy_generation_seconds").record(seconds);
}

/// 1 while a model is loaded, 0 otherwise
pub fn set_model_loaded(loaded: bool) {
    metrics::gauge!("llm_deploy_model_loaded").set(if loaded { 1.0 } else { 0.0 });
}
