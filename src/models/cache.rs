//! HuggingFace cache inspection
//!
//! Cache structure:
//! ```text
//! ~/.cache/huggingface/hub/
//! ├── models--TinyLlama--TinyLlama-1.1B-Chat-v1.0/
//! │   ├── snapshots/
//! │   │   └── {revision}/
//! │   │       ├── config.json
//! │   │       ├── model.safetensors
//! │   │       └── tokenizer.json
//! │   └── refs/
//! │       └── main
//! └── models--Qwen--Qwen2-0.5B/
//!     └── ...
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Get the HuggingFace cache directory
///
/// Checks in order:
/// 1. `$HF_HOME/hub`
/// 2. `$XDG_CACHE_HOME/huggingface/hub`
/// 3. `~/.cache/huggingface/hub`
pub fn get_cache_dir() -> PathBuf {
    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("/tmp/huggingface/hub"))
}

/// Use `cache_dir` when configured, the default HF cache otherwise
fn cache_root(cache_dir: Option<&Path>) -> PathBuf {
    cache_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(get_cache_dir)
}

/// "TinyLlama/TinyLlama-1.1B-Chat-v1.0" -> "models--TinyLlama--TinyLlama-1.1B-Chat-v1.0"
fn model_id_to_cache_name(model_id: &str) -> String {
    format!("models--{}", model_id.replace('/', "--"))
}

/// "models--Qwen--Qwen2-0.5B" -> "Qwen/Qwen2-0.5B"
fn cache_name_to_model_id(cache_name: &str) -> Option<String> {
    cache_name
        .strip_prefix("models--")
        .map(|s| s.replacen("--", "/", 1))
}

/// Check if a model has at least one snapshot with a config.json
pub fn is_model_cached_in(cache_dir: Option<&Path>, model_id: &str) -> bool {
    let snapshots_dir = cache_root(cache_dir)
        .join(model_id_to_cache_name(model_id))
        .join("snapshots");

    std::fs::read_dir(&snapshots_dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| entry.path().join("config.json").exists())
        })
        .unwrap_or(false)
}

/// Path of the model's snapshot directory, preferring `refs/main`
pub fn get_model_cache_path_in(cache_dir: Option<&Path>, model_id: &str) -> Option<PathBuf> {
    let model_dir = cache_root(cache_dir).join(model_id_to_cache_name(model_id));

    let refs_main = model_dir.join("refs/main");
    if refs_main.exists()
        && let Ok(revision) = std::fs::read_to_string(&refs_main)
    {
        let snapshot_path = model_dir.join("snapshots").join(revision.trim());
        if snapshot_path.exists() {
            return Some(snapshot_path);
        }
    }

    let entries = std::fs::read_dir(model_dir.join("snapshots")).ok()?;
    entries
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.join("config.json").exists())
}

/// Total bytes used by a cached model (blobs included)
pub fn get_cache_size_in(cache_dir: Option<&Path>, model_id: &str) -> Option<u64> {
    let model_dir = cache_root(cache_dir).join(model_id_to_cache_name(model_id));

    if !model_dir.exists() {
        return None;
    }

    Some(dir_size(&model_dir))
}

/// Recursively calculate directory size
fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}

/// A model found in the local cache
#[derive(Debug, Clone, Serialize)]
pub struct CachedModel {
    pub model_id: String,
    pub size_bytes: u64,
}

/// List all cached models, sorted by id
pub fn list_cached_models_in(cache_dir: Option<&Path>) -> Vec<CachedModel> {
    let root = cache_root(cache_dir);

    let Ok(entries) = std::fs::read_dir(&root) else {
        return Vec::new();
    };

    let mut models: Vec<CachedModel> = entries
        .flatten()
        .filter_map(|entry| cache_name_to_model_id(&entry.file_name().to_string_lossy()))
        .filter(|model_id| is_model_cached_in(Some(&root), model_id))
        .map(|model_id| CachedModel {
            size_bytes: dir_size(&root.join(model_id_to_cache_name(&model_id))),
            model_id,
        })
        .collect();

    models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    models
}
