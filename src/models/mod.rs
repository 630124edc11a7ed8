//! HuggingFace Hub helpers
//!
//! Provides functionality for:
//! - Downloading causal LM files from HuggingFace Hub
//! - Inspecting the local HuggingFace cache
//! - Parsing model metadata from config.json

pub mod cache;
pub mod download;
pub mod metadata;

pub use cache::{
    CachedModel, get_cache_dir, get_cache_size_in, get_model_cache_path_in, is_model_cached_in,
    list_cached_models_in,
};
pub use download::{DownloadRequest, ModelFiles, download_model};
pub use metadata::{HfModelMetadata, estimate_parameters, parse_config_str, parse_model_config};
