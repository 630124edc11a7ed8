//! Lifecycle state and the status record exposed to callers

use super::spec::{ModelSpec, Precision, ResolvedDevice};
use crate::error::ManagerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model manager lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Unloaded,
    Loading,
    Loaded,
    /// Transient: a failed deploy is reported, then the manager returns to `Unloaded`
    Failed,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Most recent failed deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub identifier: String,
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

/// Snapshot returned by `ModelManager::status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: ManagerState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<ModelSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<ResolvedDevice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<Precision>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub footprint_bytes: Option<u64>,

    /// Identifier being loaded while `state == Loading`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading_identifier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureRecord>,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            state: ManagerState::Unloaded,
            spec: None,
            device: None,
            dtype: None,
            architecture: None,
            loaded_at: None,
            footprint_bytes: None,
            loading_identifier: None,
            last_error: None,
        }
    }
}

impl StatusReport {
    fn clear_active(&mut self) {
        self.spec = None;
        self.device = None;
        self.dtype = None;
        self.architecture = None;
        self.loaded_at = None;
        self.footprint_bytes = None;
        self.loading_identifier = None;
    }

    pub(crate) fn begin_loading(&mut self, identifier: &str) {
        self.clear_active();
        self.state = ManagerState::Loading;
        self.loading_identifier = Some(identifier.to_string());
    }

    pub(crate) fn mark_loaded(
        &mut self,
        spec: ModelSpec,
        device: ResolvedDevice,
        dtype: Precision,
        architecture: &str,
        loaded_at: DateTime<Utc>,
        footprint_bytes: u64,
    ) {
        self.clear_active();
        self.state = ManagerState::Loaded;
        self.spec = Some(spec);
        self.device = Some(device);
        self.dtype = Some(dtype);
        self.architecture = Some(architecture.to_string());
        self.loaded_at = Some(loaded_at);
        self.footprint_bytes = Some(footprint_bytes);
        self.last_error = None;
    }

    pub(crate) fn mark_failed(&mut self, identifier: &str, error: &ManagerError) {
        self.clear_active();
        self.state = ManagerState::Failed;
        self.last_error = Some(FailureRecord {
            identifier: identifier.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            at: Utc::now(),
        });
    }

    /// Back to `Unloaded`; a recorded failure stays visible
    pub(crate) fn mark_unloaded(&mut self) {
        self.clear_active();
        self.state = ManagerState::Unloaded;
    }
}

/// Returned by a successful deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub identifier: String,
    pub device: ResolvedDevice,
    pub dtype: Precision,
    pub architecture: String,
    pub footprint_bytes: u64,
    pub load_time_secs: f64,
    pub load_in_8bit: bool,
    pub load_in_4bit: bool,
}

/// Returned by a successful undeploy
#[derive(Debug, Clone, Serialize)]
pub struct UndeployOutcome {
    pub identifier: String,
    /// `None` when the weights were still referenced elsewhere at release time
    pub freed_bytes: Option<u64>,
}
