//! llm-deploy - Single-model LLM deployment service
//!
//! Downloads a causal language model from the HuggingFace hub, keeps exactly
//! one loaded at a time, and serves text generation over HTTP.

pub mod advisor;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod models;

pub use advisor::{Advisory, ResourceAdvisor};
pub use config::ManagerConfig;
pub use engine::{CandleLoader, LanguageModel, LoadRequest, ModelLoader};
pub use error::{ManagerError, ManagerResult};
pub use manager::{
    DeployOutcome, DeviceRequest, GenerationDefaults, GenerationPlan, GenerationRequest,
    GenerationResult, ManagerOptions, ManagerState, ModelManager, ModelSpec, Precision,
    StatusReport, UndeployOutcome,
};
