//! Configuration structures and loading logic

use crate::manager::{GenerationDefaults, ModelSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub host: String,
    pub api_port: u16,

    /// HuggingFace hub cache; unset uses `$HF_HOME/hub` or `~/.cache/huggingface/hub`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Token for gated repositories, used when a deploy request carries none
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,

    pub default_max_length: usize,
    pub default_max_new_tokens: usize,
    pub default_temperature: f64,
    pub default_top_p: f64,
    pub default_top_k: usize,
    pub default_seed: u64,

    /// Model deployed at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload: Option<ModelSpec>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let defaults = GenerationDefaults::default();
        Self {
            host: default_host(),
            api_port: default_api_port(),
            cache_dir: None,
            hf_token: None,
            default_max_length: defaults.max_length,
            default_max_new_tokens: defaults.max_new_tokens,
            default_temperature: defaults.temperature,
            default_top_p: defaults.top_p,
            default_top_k: defaults.top_k,
            default_seed: defaults.seed,
            preload: None,
        }
    }
}

impl std::fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("host", &self.host)
            .field("api_port", &self.api_port)
            .field("cache_dir", &self.cache_dir)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .field("default_max_length", &self.default_max_length)
            .field("default_max_new_tokens", &self.default_max_new_tokens)
            .field("default_temperature", &self.default_temperature)
            .field("default_top_p", &self.default_top_p)
            .field("default_top_k", &self.default_top_k)
            .field("default_seed", &self.default_seed)
            .field("preload", &self.preload)
            .finish()
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(host) = std::env::var("LLM_DEPLOY_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("LLM_DEPLOY_API_PORT") {
            config.api_port = port.parse().context("Invalid LLM_DEPLOY_API_PORT value")?;
        }
        if let Ok(cache_dir) = std::env::var("LLM_DEPLOY_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(cache_dir));
        }
        if let Ok(token) = std::env::var("HF_TOKEN")
            && !token.trim().is_empty()
        {
            config.hf_token = Some(token);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.host.trim().is_empty() {
            anyhow::bail!("Host cannot be empty");
        }

        if self.default_max_length == 0 {
            anyhow::bail!("default_max_length must be > 0");
        }
        if self.default_max_new_tokens == 0 {
            anyhow::bail!("default_max_new_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be in [0, 2] (got {})",
                self.default_temperature
            );
        }
        if !(self.default_top_p > 0.0 && self.default_top_p <= 1.0) {
            anyhow::bail!("default_top_p must be in (0, 1] (got {})", self.default_top_p);
        }

        if let Some(spec) = &self.preload
            && spec.identifier.trim().is_empty()
        {
            anyhow::bail!("preload.identifier cannot be empty");
        }

        if let Some(dir) = &self.cache_dir
            && dir.exists()
            && !dir.is_dir()
        {
            anyhow::bail!("cache_dir {:?} is not a directory", dir);
        }

        Ok(())
    }

    /// Generation defaults handed to the model manager
    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            max_length: self.default_max_length,
            max_new_tokens: self.default_max_new_tokens,
            temperature: self.default_temperature,
            top_p: self.default_top_p,
            top_k: self.default_top_k,
            seed: self.default_seed,
        }
    }
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::DeviceRequest;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.default_max_new_tokens, 128);
        assert_eq!(config.generation_defaults(), GenerationDefaults::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_validation() {
        let config = ManagerConfig {
            api_port: 500, // Below 1024
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_and_sampling_validation() {
        for config in [
            ManagerConfig {
                default_max_length: 0,
                ..Default::default()
            },
            ManagerConfig {
                default_max_new_tokens: 0,
                ..Default::default()
            },
            ManagerConfig {
                default_temperature: 3.0,
                ..Default::default()
            },
            ManagerConfig {
                default_top_p: 0.0,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_partial_toml_with_preload() {
        let config: ManagerConfig = toml::from_str(
            r#"
            api_port = 9100
            default_temperature = 0.2

            [preload]
            model_name = "Qwen/Qwen2-0.5B"
            device = "auto"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.default_temperature, 0.2);
        assert_eq!(config.default_top_k, 50);
        let preload = config.preload.unwrap();
        assert_eq!(preload.identifier, "Qwen/Qwen2-0.5B");
        assert_eq!(preload.device, DeviceRequest::Auto);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "host = \"127.0.0.1\"\ndefault_seed = 7\n").unwrap();

        let config = ManagerConfig::load(Some(path)).unwrap();
        assert_eq!(config.default_seed, 7);
        assert_eq!(config.generation_defaults().seed, 7);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: env-reading tests are serialized
        unsafe {
            std::env::set_var("LLM_DEPLOY_API_PORT", "9200");
            std::env::set_var("LLM_DEPLOY_CACHE_DIR", "/tmp/llm-deploy-cache");
        }
        let config = ManagerConfig::load(None);
        unsafe {
            std::env::remove_var("LLM_DEPLOY_API_PORT");
            std::env::remove_var("LLM_DEPLOY_CACHE_DIR");
        }

        let config = config.unwrap();
        assert_eq!(config.api_port, 9200);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/llm-deploy-cache")));
    }

    #[test]
    #[serial]
    fn test_invalid_env_port() {
        // SAFETY: env-reading tests are serialized
        unsafe { std::env::set_var("LLM_DEPLOY_API_PORT", "not-a-port") };
        let result = ManagerConfig::load(None);
        unsafe { std::env::remove_var("LLM_DEPLOY_API_PORT") };
        assert!(result.is_err());
    }

    #[test]
    fn test_token_never_serialized() {
        let config = ManagerConfig {
            hf_token: Some("hf_secret".to_string()),
            ..Default::default()
        };
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("hf_secret"));
        assert!(!format!("{config:?}").contains("hf_secret"));
    }
}
