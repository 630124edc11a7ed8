//! API route definitions

use crate::manager::ModelManager;
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        // Health and observability
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Model lifecycle
        .route("/deploy", post(handlers::deploy))
        .route("/status", get(handlers::status))
        .route("/undeploy", delete(handlers::undeploy))
        // Inference
        .route("/query", post(handlers::query))
        // Planning
        .route("/advisor", get(handlers::advisor))
        .route("/models/cached", get(handlers::cached_models))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
