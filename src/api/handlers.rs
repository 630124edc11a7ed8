//! API request handlers

use super::models::{AdvisorQuery, HealthResponse, QueryResponse, ServiceInfo};
use super::routes::AppState;
use crate::advisor::Advisory;
use crate::error::ManagerError;
use crate::manager::{DeployOutcome, GenerationRequest, ModelSpec, StatusReport, UndeployOutcome};
use crate::models::{CachedModel, list_cached_models_in};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

/// GET / - Service banner
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        status: state.manager.status().await,
        endpoints: vec![
            "GET /health",
            "GET /metrics",
            "GET /status",
            "POST /deploy",
            "POST /query",
            "DELETE /undeploy",
            "GET /advisor?model=<id>",
            "GET /models/cached",
        ],
    })
}

/// GET /health - Liveness check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// POST /deploy - Load a model, replacing the current one
pub async fn deploy(
    State(state): State<AppState>,
    Json(spec): Json<ModelSpec>,
) -> Result<Json<DeployOutcome>, ManagerError> {
    let identifier = spec.identifier.clone();
    let manager = state.manager.clone();

    // Detached so a client disconnect cannot abandon the manager mid-load
    let outcome = tokio::spawn(async move { manager.deploy(spec).await })
        .await
        .map_err(|e| ManagerError::Unknown {
            identifier,
            message: format!("deploy task failed: {e}"),
        })??;

    Ok(Json(outcome))
}

/// POST /query - Generate text with the loaded model
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<QueryResponse>, ManagerError> {
    let result = state.manager.generate(request).await?;
    Ok(Json(result.into()))
}

/// GET /status - Lifecycle state and active model
pub async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.manager.status().await)
}

/// DELETE /undeploy - Release the loaded model
pub async fn undeploy(State(state): State<AppState>) -> Result<Json<UndeployOutcome>, ManagerError> {
    let outcome = state.manager.undeploy().await?;
    Ok(Json(outcome))
}

/// GET /advisor?model=<id> - Resource advice for a model
pub async fn advisor(
    State(state): State<AppState>,
    Query(params): Query<AdvisorQuery>,
) -> Result<Json<Advisory>, ManagerError> {
    let identifier = params.model.trim().to_string();
    if identifier.is_empty() {
        return Err(ManagerError::invalid_request("query parameter 'model' must not be empty"));
    }

    let manager = state.manager.clone();
    let advisory = tokio::task::spawn_blocking(move || manager.advise(&identifier))
        .await
        .map_err(|e| ManagerError::Unknown {
            identifier: params.model,
            message: format!("advisor task failed: {e}"),
        })?;

    Ok(Json(advisory))
}

/// GET /models/cached - Models present in the local hub cache
pub async fn cached_models(State(state): State<AppState>) -> Json<Vec<CachedModel>> {
    Json(list_cached_models_in(state.manager.cache_dir()))
}
