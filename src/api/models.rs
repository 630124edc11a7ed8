//! API request and response models

use crate::manager::{GenerationResult, StatusReport};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Service banner returned by `GET /`
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: StatusReport,
    pub endpoints: Vec<&'static str>,
}

/// Generation result plus the first variant as `response`
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    #[serde(flatten)]
    pub result: GenerationResult,
}

impl From<GenerationResult> for QueryResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            response: result.variants.first().cloned().unwrap_or_default(),
            result,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdvisorQuery {
    pub model: String,
}
