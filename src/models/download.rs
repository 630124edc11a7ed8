//! Model download functionality using hf-hub
//!
//! Fetches the files a causal LM needs (config, tokenizer, safetensors weights)
//! into the standard HuggingFace cache, reusing anything already cached.

use crate::error::ManagerError;
use hf_hub::api::tokio::{ApiBuilder, ApiError, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// What to fetch
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub model_id: &'a str,
    pub revision: &'a str,
    pub token: Option<&'a str>,
    /// Custom cache directory; `None` uses the default HF cache
    pub cache_dir: Option<PathBuf>,
}

/// Local paths of a downloaded model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub snapshot_dir: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    /// One file, or every shard listed in the safetensors index
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Total on-disk size of the weight files
    pub fn weights_size_bytes(&self) -> u64 {
        self.weights
            .iter()
            .filter_map(|path| std::fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum()
    }
}

/// Download a model from HuggingFace Hub
///
/// # Returns
/// * `Ok(ModelFiles)` - Paths inside the model's snapshot directory
/// * `Err(ManagerError)` - Classified failure (access, not found, network, ...)
pub async fn download_model(request: DownloadRequest<'_>) -> Result<ModelFiles, ManagerError> {
    let model_id = request.model_id;
    tracing::info!(
        model = %model_id,
        revision = %request.revision,
        cache_dir = ?request.cache_dir,
        authenticated = request.token.is_some(),
        "Fetching model files via hf-hub"
    );

    let mut builder = ApiBuilder::new().with_progress(false);
    if let Some(dir) = request.cache_dir {
        builder = builder.with_cache_dir(dir);
    }
    if let Some(token) = request.token {
        builder = builder.with_token(Some(token.to_string()));
    }
    let api = builder
        .build()
        .map_err(|e| hub_failure(model_id, "Failed to create HF API client", &e))?;

    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        request.revision.to_string(),
    ));

    let config = fetch(&repo, model_id, "config.json").await?;
    let tokenizer = fetch(&repo, model_id, "tokenizer.json").await?;
    let weights = download_weights(&repo, model_id).await?;

    let snapshot_dir = config
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| ManagerError::Unknown {
            identifier: model_id.to_string(),
            message: "Model downloaded but snapshot path not found".to_string(),
        })?;

    tracing::debug!(
        model = %model_id,
        snapshot = ?snapshot_dir,
        weight_files = weights.len(),
        "Model files available"
    );

    Ok(ModelFiles {
        snapshot_dir,
        config,
        tokenizer,
        weights,
    })
}

async fn fetch(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, ManagerError> {
    tracing::debug!(model = %model_id, file = %file, "Downloading file");
    repo.get(file)
        .await
        .map_err(|e| hub_failure(model_id, &format!("Failed to download {file}"), &e))
}

/// Classify a hub client error by the HTTP status of the response, or as a
/// transport failure when no response arrived
fn hub_failure(model_id: &str, context: &str, err: &ApiError) -> ManagerError {
    let message = format!("{context}: {err}");
    match err {
        ApiError::TooManyRetries(inner) => hub_failure(model_id, context, inner),
        ApiError::RequestError(e) => match e.status() {
            Some(status) => ManagerError::from_hub_status(model_id, status.as_u16(), message),
            None => ManagerError::NetworkError {
                identifier: model_id.to_string(),
                message,
            },
        },
        ApiError::IoError(e) if e.kind() == std::io::ErrorKind::OutOfMemory => {
            ManagerError::OutOfMemory {
                identifier: model_id.to_string(),
                message,
            }
        }
        _ => ManagerError::Unknown {
            identifier: model_id.to_string(),
            message,
        },
    }
}

/// Single-file safetensors first, then a sharded index
async fn download_weights(repo: &ApiRepo, model_id: &str) -> Result<Vec<PathBuf>, ManagerError> {
    if let Ok(path) = repo.get("model.safetensors").await {
        return Ok(vec![path]);
    }

    let index_path = match repo.get("model.safetensors.index.json").await {
        Ok(path) => path,
        Err(e) => {
            // Anything but a plain 404 (auth, network) keeps its own category
            return Err(match hub_failure(model_id, "Failed to download weights", &e) {
                ManagerError::NotFound { .. } => ManagerError::UnsupportedModel {
                    identifier: model_id.to_string(),
                    message: "repository has no safetensors weights".to_string(),
                },
                other => other,
            });
        }
    };

    let shards = read_shard_names(&index_path, model_id).await?;

    tracing::info!(
        model = %model_id,
        shard_count = shards.len(),
        "Downloading sharded weights"
    );

    let mut paths = Vec::with_capacity(shards.len());
    for shard in &shards {
        paths.push(fetch(repo, model_id, shard).await?);
    }
    Ok(paths)
}

/// Unique shard filenames from a `model.safetensors.index.json`
async fn read_shard_names(index_path: &PathBuf, model_id: &str) -> Result<Vec<String>, ManagerError> {
    let content = tokio::fs::read_to_string(index_path)
        .await
        .map_err(|e| ManagerError::Unknown {
            identifier: model_id.to_string(),
            message: format!("Failed to read index file: {e}"),
        })?;

    shard_names(&content).ok_or_else(|| ManagerError::Unknown {
        identifier: model_id.to_string(),
        message: "Malformed model.safetensors.index.json".to_string(),
    })
}

fn shard_names(index_content: &str) -> Option<Vec<String>> {
    let index: serde_json::Value = serde_json::from_str(index_content).ok()?;
    let weight_map = index.get("weight_map")?.as_object()?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();

    (!shards.is_empty()).then(|| shards.into_iter().collect())
}
