//! Configuration file management for mealstream.
//!
//! Provides a TOML-based config file at `~/.config/mealstream/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mealstream_core::config::{
    CacheConfig, GateConfig, INFERENCE_URL_ENV, InferenceConfig, MODELS_ENV, ServiceConfig,
    parse_models,
};

/// Env var overriding the server bind address.
pub const BIND_ENV: &str = "MEALSTREAM_BIND";

/// Env var overriding the server port.
pub const PORT_ENV: &str = "MEALSTREAM_PORT";

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3001;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub inference: InferenceSection,
    pub gate: GateSection,
    pub cache: CacheSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Highest priority first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_max_entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_max_entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,
}

impl ConfigFile {
    /// A file with every setting spelled out at its default, pointing at
    /// `base_url`.
    pub fn with_defaults(base_url: &str) -> Self {
        let inference = InferenceConfig::new(base_url);
        let gate = GateConfig::default();
        let cache = CacheConfig::default();
        Self {
            server: ServerSection {
                bind: Some(DEFAULT_BIND.to_string()),
                port: Some(DEFAULT_PORT),
            },
            inference: InferenceSection {
                base_url: Some(inference.base_url),
                models: Some(inference.models),
                unit_timeout_secs: Some(inference.unit_timeout.as_secs()),
                warmup_timeout_secs: Some(inference.warmup_timeout.as_secs()),
                token_limit: Some(inference.token_limit),
                temperature: Some(inference.temperature),
                context_window: Some(inference.context_window),
            },
            gate: GateSection {
                capacity: Some(gate.capacity),
            },
            cache: CacheSection {
                plan_ttl_secs: Some(cache.plan_ttl.as_secs()),
                plan_max_entries: Some(cache.plan_max_entries),
                chat_ttl_secs: Some(cache.chat_ttl.as_secs()),
                chat_max_entries: Some(cache.chat_max_entries),
                cleanup_interval_secs: Some(cache.cleanup_interval.as_secs()),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the mealstream config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/mealstream` or
/// `~/.config/mealstream`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("mealstream");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("mealstream")
}

/// Return the path to the mealstream config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`. A missing file is `None`; an
/// unreadable or invalid one is an error.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub inference_url: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct MealstreamConfig {
    pub bind: String,
    pub port: u16,
    pub service: ServiceConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MealstreamConfig {
    /// Resolve configuration from the default config file location.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        Self::resolve_with(cli, load_config_from(&config_path())?)
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - Inference URL: `--inference-url` > `MEALSTREAM_INFERENCE_URL` > `[inference] base_url`
    /// - Models: `MEALSTREAM_MODELS` > `[inference] models`
    /// - Bind / port: flag > `MEALSTREAM_BIND` / `MEALSTREAM_PORT` > `[server]`
    pub fn resolve_with(cli: &CliOverrides, file: Option<ConfigFile>) -> Result<Self> {
        let ConfigFile {
            server,
            inference: section,
            gate: gate_section,
            cache: cache_section,
        } = file.unwrap_or_default();

        let bind = cli
            .bind
            .clone()
            .or_else(|| env_var(BIND_ENV))
            .or(server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let port = match (cli.port, env_var(PORT_ENV)) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a valid port: {raw:?}"))?,
            (None, None) => server.port.unwrap_or(DEFAULT_PORT),
        };

        let base_url = cli
            .inference_url
            .clone()
            .or_else(|| env_var(INFERENCE_URL_ENV))
            .or(section.base_url)
            .unwrap_or_else(|| InferenceConfig::DEFAULT_URL.to_string());

        let mut inference = InferenceConfig::new(base_url);
        if let Some(raw) = env_var(MODELS_ENV) {
            inference.models =
                parse_models(&raw).with_context(|| format!("invalid {MODELS_ENV}"))?;
        } else if let Some(models) = section.models {
            inference = inference
                .with_models(models)
                .context("invalid [inference] models in config file")?;
        }

        if let Some(secs) = section.unit_timeout_secs {
            inference.unit_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = section.warmup_timeout_secs {
            inference.warmup_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = section.token_limit {
            inference.token_limit = limit;
        }
        if let Some(temperature) = section.temperature {
            inference.temperature = temperature;
        }
        if let Some(window) = section.context_window {
            inference.context_window = window;
        }
        inference.validate().context("invalid inference settings")?;

        let mut gate = GateConfig::default();
        if let Some(capacity) = gate_section.capacity {
            gate.capacity = capacity.max(1);
        }

        let mut cache = CacheConfig::default();
        if let Some(secs) = cache_section.plan_ttl_secs {
            cache.plan_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = cache_section.plan_max_entries {
            cache.plan_max_entries = n;
        }
        if let Some(secs) = cache_section.chat_ttl_secs {
            cache.chat_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = cache_section.chat_max_entries {
            cache.chat_max_entries = n;
        }
        if let Some(secs) = cache_section.cleanup_interval_secs {
            cache.cleanup_interval = Duration::from_secs(secs.max(1));
        }

        Ok(Self {
            bind,
            port,
            service: ServiceConfig {
                inference,
                gate,
                cache,
            },
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        for var in [BIND_ENV, PORT_ENV, INFERENCE_URL_ENV, MODELS_ENV] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("mealstream").join("config.toml");

        let original = ConfigFile::with_defaults("http://gpu-box:11434");
        save_config_to(&original, &path).unwrap();

        let loaded = load_config_from(&path).unwrap().expect("file exists");
        assert_eq!(loaded.inference.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(loaded.server.port, Some(DEFAULT_PORT));
        assert_eq!(loaded.gate.capacity, Some(1));
        assert_eq!(loaded.cache.chat_max_entries, Some(100));
    }

    #[test]
    fn missing_file_is_none_and_invalid_file_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        assert!(load_config_from(&path).unwrap().is_none());

        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"), "unexpected: {err:#}");
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let file: ConfigFile = toml::from_str("[gate]\ncapacity = 2\n").unwrap();
        let _lock = lock_env();
        clear_env();

        let config = MealstreamConfig::resolve_with(&CliOverrides::default(), Some(file)).unwrap();
        assert_eq!(config.service.gate.capacity, 2);
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.service.inference.base_url, InferenceConfig::DEFAULT_URL);
        assert_eq!(config.service.inference.primary_model(), "llama3.2:3b");
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(INFERENCE_URL_ENV, "http://env:11434") };
        unsafe { std::env::set_var(PORT_ENV, "4000") };

        let mut file = ConfigFile::default();
        file.inference.base_url = Some("http://file:11434".into());
        let cli = CliOverrides {
            bind: None,
            port: Some(5000),
            inference_url: Some("http://cli:11434".into()),
        };
        let config = MealstreamConfig::resolve_with(&cli, Some(file)).unwrap();
        clear_env();

        assert_eq!(config.service.inference.base_url, "http://cli:11434");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(INFERENCE_URL_ENV, "http://env:11434") };
        unsafe { std::env::set_var(MODELS_ENV, "tiny:1b, small:3b") };
        unsafe { std::env::set_var(BIND_ENV, "0.0.0.0") };

        let mut file = ConfigFile::default();
        file.inference.base_url = Some("http://file:11434".into());
        file.inference.models = Some(vec!["file-model".into()]);
        file.server.bind = Some("10.0.0.1".into());
        let config = MealstreamConfig::resolve_with(&CliOverrides::default(), Some(file)).unwrap();
        clear_env();

        assert_eq!(config.service.inference.base_url, "http://env:11434");
        assert_eq!(config.service.inference.models, vec!["tiny:1b", "small:3b"]);
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn file_tuning_values_are_applied() {
        let toml = r#"
[inference]
base_url = "http://file:11434"
models = ["a", "b"]
unit_timeout_secs = 12
token_limit = 256

[cache]
plan_ttl_secs = 60
cleanup_interval_secs = 0
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        let _lock = lock_env();
        clear_env();

        let config = MealstreamConfig::resolve_with(&CliOverrides::default(), Some(file)).unwrap();
        let inference = &config.service.inference;
        assert_eq!(inference.base_url, "http://file:11434");
        assert_eq!(inference.models, vec!["a", "b"]);
        assert_eq!(inference.unit_timeout, Duration::from_secs(12));
        assert_eq!(inference.token_limit, 256);
        assert_eq!(config.service.cache.plan_ttl, Duration::from_secs(60));
        // A zero interval would spin the janitor.
        assert_eq!(config.service.cache.cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn invalid_values_are_reported() {
        let _lock = lock_env();
        clear_env();

        unsafe { std::env::set_var(PORT_ENV, "eighty") };
        let err = MealstreamConfig::resolve_with(&CliOverrides::default(), None).unwrap_err();
        clear_env();
        assert!(err.to_string().contains(PORT_ENV), "unexpected: {err:#}");

        let cli = CliOverrides {
            inference_url: Some("localhost:11434".into()),
            ..CliOverrides::default()
        };
        assert!(MealstreamConfig::resolve_with(&cli, None).is_err());

        let mut file = ConfigFile::default();
        file.inference.models = Some(vec![]);
        assert!(MealstreamConfig::resolve_with(&CliOverrides::default(), Some(file)).is_err());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("mealstream/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
