//! Runtime configuration for the generation core.
//!
//! Each section has a `Default` and, where it makes sense, a `from_env`
//! constructor. The CLI layers its config file and flags on top.

use std::env;
use std::time::Duration;

/// Env var overriding the inference backend base URL.
pub const INFERENCE_URL_ENV: &str = "MEALSTREAM_INFERENCE_URL";

/// Env var overriding the model list (comma-separated, highest priority first).
pub const MODELS_ENV: &str = "MEALSTREAM_MODELS";

/// Errors from building configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("model list is empty")]
    EmptyModelList,

    #[error("invalid inference URL {0:?}: must start with http:// or https://")]
    InvalidUrl(String),
}

/// Split a comma-separated model list, dropping blanks.
pub fn parse_models(list: &str) -> Result<Vec<String>, ConfigError> {
    let models: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect();
    if models.is_empty() {
        return Err(ConfigError::EmptyModelList);
    }
    Ok(models)
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Connection and sampling settings for the inference backend.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the Ollama-compatible server.
    pub base_url: String,
    /// Models to try, highest priority first. Never empty.
    pub models: Vec<String>,
    /// Deadline for one unit generation call.
    pub unit_timeout: Duration,
    /// Deadline for one warm-up call.
    pub warmup_timeout: Duration,
    /// Maximum tokens generated per unit.
    pub token_limit: u32,
    pub temperature: f32,
    /// Context window requested from the backend.
    pub context_window: u32,
}

impl InferenceConfig {
    /// Default base URL (local Ollama).
    pub const DEFAULT_URL: &str = "http://localhost:11434";

    /// Default model priority list.
    pub const DEFAULT_MODELS: [&str; 3] = ["llama3.2:3b", "llama3.2:1b", "qwen2.5:0.5b"];

    /// Build a config for an explicit base URL with default tuning.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            models: Self::DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            unit_timeout: Duration::from_secs(45),
            warmup_timeout: Duration::from_secs(20),
            token_limit: 400,
            temperature: 0.7,
            context_window: 2048,
        }
    }

    /// Build a config from the environment.
    ///
    /// Priority: `MEALSTREAM_INFERENCE_URL` / `MEALSTREAM_MODELS`, then the
    /// compile-time defaults. A blank model list in the env is ignored.
    pub fn from_env() -> Self {
        let base_url = env::var(INFERENCE_URL_ENV).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        let mut config = Self::new(base_url);
        if let Ok(list) = env::var(MODELS_ENV) {
            if let Ok(models) = parse_models(&list) {
                config.models = models;
            }
        }
        config
    }

    /// Replace the model list.
    pub fn with_models(mut self, models: Vec<String>) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::EmptyModelList);
        }
        self.models = models;
        Ok(self)
    }

    /// Check the base URL looks like an HTTP endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        if self.models.is_empty() {
            return Err(ConfigError::EmptyModelList);
        }
        Ok(())
    }

    /// The highest-priority model.
    pub fn primary_model(&self) -> &str {
        self.models
            .first()
            .map(String::as_str)
            .unwrap_or(Self::DEFAULT_MODELS[0])
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

// ---------------------------------------------------------------------------
// Gate and cache
// ---------------------------------------------------------------------------

/// Admission control settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum concurrent generation calls across all sessions.
    pub capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { capacity: 1 }
    }
}

/// Sizes and lifetimes of the two cache tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub plan_ttl: Duration,
    pub plan_max_entries: usize,
    pub chat_ttl: Duration,
    pub chat_max_entries: usize,
    /// How often the janitor purges expired entries.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            plan_ttl: Duration::from_secs(60 * 60),
            plan_max_entries: 500,
            chat_ttl: Duration::from_secs(24 * 60 * 60),
            chat_max_entries: 100,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Everything the core needs to run.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub inference: InferenceConfig,
    pub gate: GateConfig,
    pub cache: CacheConfig,
}
