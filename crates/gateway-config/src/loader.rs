//! Configuration loading from files and environment.
//!
//! This module provides configuration loading from YAML, TOML and JSON files,
//! with support for environment variable substitution and overrides.

use crate::schema::GatewayConfig;
use gateway_telemetry::LogFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::SecretString;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Default environment prefix for overrides
pub const DEFAULT_ENV_PREFIX: &str = "LLM_GATEWAY";

#[allow(clippy::expect_used)]
static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env reference regex"));

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path to the file that was not found
        path: String,
    },

    /// IO error
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unsupported format
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// The file extension that was not supported
        extension: String,
    },
}

/// Configuration source
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path
    File(String),
    /// Raw YAML string
    Yaml(String),
    /// Raw TOML string
    Toml(String),
    /// Raw JSON string
    Json(String),
    /// Default configuration
    Default,
}

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration source
    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file source
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.with_source(ConfigSource::File(path.into()))
    }

    /// Set environment variable prefix for overrides
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load configuration from all sources
    ///
    /// # Errors
    /// Returns error if any source fails to load or validate
    pub async fn load(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = GatewayConfig::default();

        for source in &self.sources {
            let source_config = Self::load_source(source).await?;
            config = Self::merge_configs(config, source_config);
        }

        if let Some(prefix) = &self.env_prefix {
            Self::apply_env_overrides(&mut config, prefix);
        }

        config.validate_config().map_err(ConfigError::Validation)?;

        info!(
            providers = ?config.providers.configured_ids(),
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    async fn load_source(source: &ConfigSource) -> Result<GatewayConfig, ConfigError> {
        match source {
            ConfigSource::File(path) => Self::load_file(path).await,
            ConfigSource::Yaml(content) => Self::parse_yaml(&Self::substitute_env_vars(content)),
            ConfigSource::Toml(content) => Self::parse_toml(&Self::substitute_env_vars(content)),
            ConfigSource::Json(content) => Self::parse_json(&Self::substitute_env_vars(content)),
            ConfigSource::Default => Ok(GatewayConfig::default()),
        }
    }

    async fn load_file(path: &str) -> Result<GatewayConfig, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = fs::read_to_string(path).await?;
        let content = Self::substitute_env_vars(&content);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        debug!(path = %path.display(), format = %extension, "Loading configuration file");

        match extension.as_str() {
            "yaml" | "yml" => Self::parse_yaml(&content),
            "toml" => Self::parse_toml(&content),
            "json" => Self::parse_json(&content),
            ext => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    fn parse_yaml(content: &str) -> Result<GatewayConfig, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn parse_toml(content: &str) -> Result<GatewayConfig, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn parse_json(content: &str) -> Result<GatewayConfig, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Substitute `${VAR}` and `${VAR:-default}` references.
    ///
    /// Unset variables without a default are left in place and reported.
    fn substitute_env_vars(content: &str) -> String {
        ENV_REF
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let spec = &caps[1];
                let (name, default) = match spec.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (spec, None),
                };
                match (std::env::var(name), default) {
                    (Ok(value), _) => value,
                    (Err(_), Some(default)) => default.to_string(),
                    (Err(_), None) => {
                        warn!(variable = %name, "Environment variable not found");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Later sources win; provider sections are only replaced when the overlay sets them.
    fn merge_configs(base: GatewayConfig, overlay: GatewayConfig) -> GatewayConfig {
        GatewayConfig {
            providers: crate::schema::ProvidersConfig {
                azure: overlay.providers.azure.or(base.providers.azure),
                bedrock: overlay.providers.bedrock.or(base.providers.bedrock),
            },
            routing: if overlay.routing.default_provider.is_none()
                && overlay.routing.model_routes.is_empty()
            {
                base.routing
            } else {
                overlay.routing
            },
            logging: overlay.logging,
            limits: overlay.limits,
            resilience: overlay.resilience,
            conversation: overlay.conversation,
        }
    }

    fn apply_env_overrides(config: &mut GatewayConfig, prefix: &str) {
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();

        if let Some(level) = var("LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(format) = var("LOG_FORMAT") {
            match serde_json::from_value::<LogFormat>(serde_json::Value::String(
                format.to_lowercase(),
            )) {
                Ok(format) => config.logging.format = format,
                Err(_) => warn!(value = %format, "Ignoring unknown log format override"),
            }
        }

        if let Some(provider) = var("DEFAULT_PROVIDER") {
            config.routing.default_provider = Some(provider);
        }

        if let Some(dev) = var("DEVELOPMENT_MODE") {
            config.resilience.development_mode = dev.parse().unwrap_or(false);
        }

        if let Some(key) = var("AZURE_API_KEY") {
            if let Some(azure) = config.providers.azure.as_mut() {
                azure.api_key = SecretString::new(key);
            }
        }

        if let Some(key) = var("BEDROCK_API_KEY") {
            if let Some(bedrock) = config.providers.bedrock.as_mut() {
                bedrock.api_key = SecretString::new(key);
            }
        }
    }
}

/// Load configuration from default locations
///
/// Looks for configuration in order:
/// 1. Path from CONFIG_PATH environment variable
/// 2. ./config.yaml
/// 3. ./config/default.yaml
///
/// # Errors
/// Returns error if a configuration file is found but fails to parse or validate
pub async fn load_config() -> Result<GatewayConfig, ConfigError> {
    let config_path = std::env::var("CONFIG_PATH").ok();

    let search_paths = if let Some(ref path) = config_path {
        vec![path.as_str()]
    } else {
        vec![
            "config.yaml",
            "config.yml",
            "config/default.yaml",
            "config/default.yml",
        ]
    };

    for path in &search_paths {
        if Path::new(path).exists() {
            info!(path = %path, "Loading configuration");
            return ConfigLoader::new()
                .with_file(*path)
                .with_env_prefix(DEFAULT_ENV_PREFIX)
                .load()
                .await;
        }
    }

    warn!("No configuration file found, using defaults");
    ConfigLoader::new()
        .with_source(ConfigSource::Default)
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .await
}
