//! Error types for the model manager and their API responses

use crate::manager::ManagerState;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by [`crate::ModelManager`] operations
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot {operation} while model manager is {state}")]
    InvalidState {
        operation: &'static str,
        state: ManagerState,
    },

    #[error("access denied for '{identifier}': {message}")]
    AccessDenied { identifier: String, message: String },

    #[error("model '{identifier}' not found on the hub")]
    NotFound { identifier: String },

    #[error("out of memory while handling '{identifier}': {message}")]
    OutOfMemory { identifier: String, message: String },

    #[error("network error while fetching '{identifier}': {message}")]
    NetworkError { identifier: String, message: String },

    #[error("generation failed: {message}")]
    GenerationError { message: String },

    #[error("no model is currently deployed")]
    NothingToUndeploy,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("model '{identifier}' is not supported: {message}")]
    UnsupportedModel { identifier: String, message: String },

    #[error("failed to load '{identifier}': {message}")]
    Unknown { identifier: String, message: String },
}

pub type ManagerResult<T> = Result<T, ManagerError>;

impl ManagerError {
    /// Stable category name used in API bodies and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::AccessDenied { .. } => "access_denied",
            Self::NotFound { .. } => "not_found",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::NetworkError { .. } => "network_error",
            Self::GenerationError { .. } => "generation_error",
            Self::NothingToUndeploy => "nothing_to_undeploy",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedModel { .. } => "unsupported_model",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Whether repeating the same call later can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. } | Self::OutOfMemory { .. } | Self::InvalidState { .. }
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::GenerationError {
            message: err.to_string(),
        }
    }

    /// Classify a failed hub request by its HTTP status
    pub fn from_hub_status(identifier: &str, status: u16, message: impl Into<String>) -> Self {
        let identifier = identifier.to_string();
        let message = message.into();
        match status {
            // The hub answers 401 for gated and for unknown repositories alike
            401 | 403 => Self::AccessDenied {
                identifier,
                message,
            },
            404 => Self::NotFound { identifier },
            408 | 429 | 500..=599 => Self::NetworkError {
                identifier,
                message,
            },
            _ => Self::Unknown {
                identifier,
                message,
            },
        }
    }

    /// Classify a load failure raised while materializing weights.
    ///
    /// candle reports allocation failures only through its error text.
    pub fn classify_load_failure(identifier: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let identifier = identifier.to_string();

        if lower.contains("out of memory")
            || lower.contains("cannot allocate")
            || lower.contains("memory allocation")
        {
            Self::OutOfMemory {
                identifier,
                message,
            }
        } else {
            Self::Unknown {
                identifier,
                message,
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidState { .. } | Self::NothingToUndeploy => StatusCode::CONFLICT,
            Self::UnsupportedModel { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OutOfMemory { .. } => StatusCode::INSUFFICIENT_STORAGE,
            Self::NetworkError { .. } => StatusCode::BAD_GATEWAY,
            Self::GenerationError { .. } | Self::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            retryable: self.is_retryable(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
    retryable: bool,
    timestamp: chrono::DateTime<chrono::Utc>,
}
