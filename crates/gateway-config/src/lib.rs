//! # Gateway Configuration
//!
//! Configuration management for the protocol gateway, including:
//! - Configuration schema and validation
//! - Loading from YAML/TOML/JSON files or inline sources
//! - Environment variable substitution and overrides

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod schema;

// Re-export main types
pub use loader::{load_config, ConfigError, ConfigLoader, ConfigSource, DEFAULT_ENV_PREFIX};
pub use schema::{
    AzureSettings, BedrockSettings, CircuitBreakerSettings, ConversationConfig, FallbackSettings,
    GatewayConfig, LimitsConfig, ModelRoute, ProvidersConfig,
    ResilienceConfig, RetrySettings, RoutingConfig, AZURE_PROVIDER_ID, BEDROCK_PROVIDER_ID,
};
