//! Runtime configuration.
//!
//! An optional `~/.openevo/config.yaml` sets the provider, model, and
//! directories; environment variables and CLI flags override it. The API
//! key itself never lives in the file, only the name of the variable that
//! holds it.

use crate::llm::{Credentials, Dialect, HttpLlmClient};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing configuration: {0}")]
    Missing(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire dialect: `anthropic` or `openai`.
    #[serde(default = "default_dialect")]
    pub dialect: String,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_dialect() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENEVO_API_KEY".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            dialect: default_dialect(),
            base_url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub skills_dir: Option<PathBuf>,

    #[serde(default)]
    pub provider: ProviderConfig,
}

impl RuntimeConfig {
    /// Load from an explicit path, or the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<RuntimeConfig> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = default_config_path();
                if !default.exists() {
                    debug!("No config file, using defaults");
                    return Ok(RuntimeConfig::default());
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path)?;
        let config: RuntimeConfig = serde_yaml::from_str(&raw)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }
}

fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".openevo").join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from(".openevo/config.yaml"))
}

impl ProviderConfig {
    pub fn dialect(&self) -> Result<Dialect> {
        self.dialect
            .parse()
            .map_err(|e: String| ConfigError::Missing(e))
    }

    /// Build the streaming client from this configuration.
    pub fn build_client(&self) -> Result<HttpLlmClient> {
        let dialect = self.dialect()?;
        let key = std::env::var(&self.api_key_env).map_err(|_| {
            ConfigError::Missing(format!(
                "API key environment variable {} is not set",
                self.api_key_env
            ))
        })?;

        let (base_url, credentials) = match dialect {
            Dialect::Anthropic => (
                self.base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()),
                Credentials::api_key(key, "x-api-key"),
            ),
            Dialect::OpenAi => (
                self.base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
                Credentials::api_key(format!("Bearer {}", key), "Authorization"),
            ),
        };

        Ok(HttpLlmClient::new(
            dialect,
            base_url,
            self.model.clone(),
            credentials,
        ))
    }
}
