//! Configuration schema definitions.
//!
//! This module defines all configuration types with validation and defaults.
//! Durations are humantime strings (`"30s"`, `"5m"`); secrets are never
//! serialized back out.

use gateway_telemetry::LoggingConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// Provider id of the Azure OpenAI Responses backend
pub const AZURE_PROVIDER_ID: &str = "azure";
/// Provider id of the AWS Bedrock Converse backend
pub const BEDROCK_PROVIDER_ID: &str = "bedrock";

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Request and payload limits
    #[validate(nested)]
    pub limits: LimitsConfig,

    /// Resilience configuration
    #[validate(nested)]
    pub resilience: ResilienceConfig,

    /// Conversation continuity configuration
    #[validate(nested)]
    pub conversation: ConversationConfig,

    /// Upstream providers
    #[validate(nested)]
    pub providers: ProvidersConfig,

    /// Model routing
    #[validate(nested)]
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    /// Validate field ranges and cross-section references
    ///
    /// # Errors
    /// Returns a description of the first problem found
    pub fn validate_config(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;

        for (name, retry) in [
            ("resilience.retry", &self.resilience.retry),
            ("resilience.streaming_retry", &self.resilience.streaming_retry),
        ] {
            if retry.max_delay < retry.base_delay {
                return Err(format!("{name}: max_delay must be >= base_delay"));
            }
            if retry.timeout.is_zero() {
                return Err(format!("{name}: timeout must be positive"));
            }
        }

        if self.resilience.circuit_breaker.cooldown.is_zero() {
            return Err("resilience.circuit_breaker.cooldown must be positive".to_string());
        }

        let configured = self.providers.configured_ids();
        if let Some(default) = &self.routing.default_provider {
            if !configured.contains(&default.as_str()) {
                return Err(format!(
                    "routing.default_provider '{default}' is not a configured provider"
                ));
            }
        }
        for route in &self.routing.model_routes {
            if !configured.contains(&route.provider.as_str()) {
                return Err(format!(
                    "routing.model_routes: prefix '{}' targets unconfigured provider '{}'",
                    route.prefix, route.provider
                ));
            }
        }

        Ok(())
    }
}

/// Request and transform limits
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum messages per request
    #[validate(range(min = 1))]
    pub max_messages: usize,

    /// Maximum characters per message
    #[validate(range(min = 1))]
    pub max_message_length: usize,

    /// Maximum upstream response body size in bytes
    #[validate(range(min = 1))]
    pub max_response_size: usize,

    /// Maximum number of output items/choices accepted from upstream
    #[validate(range(min = 1))]
    pub max_choices_count: usize,

    /// Maximum characters of generated text accepted from upstream
    #[validate(range(min = 1))]
    pub max_completion_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_messages: 1_000,
            max_message_length: 1_000_000,
            max_response_size: 10 * 1024 * 1024, // 10MB
            max_choices_count: 128,
            max_completion_length: 2_000_000,
        }
    }
}

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker settings (one breaker per provider)
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Retry settings for buffered calls
    #[validate(nested)]
    pub retry: RetrySettings,

    /// Retry settings for stream establishment
    #[validate(nested)]
    pub streaming_retry: RetrySettings,

    /// Fallback settings
    #[validate(nested)]
    pub fallback: FallbackSettings,

    /// Include debug details in client error bodies
    pub development_mode: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            streaming_retry: RetrySettings {
                max_attempts: 2,
                ..RetrySettings::default()
            },
            fallback: FallbackSettings::default(),
            development_mode: false,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before opening
    #[validate(range(min = 1, max = 1000))]
    pub failure_threshold: u32,

    /// Time spent open before admitting a probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential growth factor
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay (0.0 - 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_factor: f64,

    /// Wall-clock bound of the whole call, across attempts
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Upstream statuses treated as transient
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            timeout: Duration::from_secs(120),
            retryable_status_codes: default_retry_codes(),
        }
    }
}

fn default_retry_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

/// Fallback settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FallbackSettings {
    /// Enable degraded responses for degradable operations
    pub enabled: bool,

    /// Operation names that may be answered with a placeholder
    pub degradable_operations: Vec<String>,

    /// Placeholder text used when no format-specific text is configured
    #[validate(length(min = 1))]
    pub placeholder_text: String,

    /// Retry-After hint attached to synthesized errors
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,

    /// Placeholder text per inbound format (`claude`, `openai`)
    pub format_placeholders: HashMap<String, String>,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            degradable_operations: vec!["create_response".to_string()],
            placeholder_text: "The service is temporarily unavailable. Please try again shortly."
                .to_string(),
            retry_after: Duration::from_secs(30),
            format_placeholders: HashMap::new(),
        }
    }
}

/// Conversation continuity configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConversationConfig {
    /// Maximum history entries per conversation
    #[validate(range(min = 1))]
    pub max_history_length: usize,

    /// Maximum age of a history entry
    #[serde(with = "humantime_serde")]
    pub max_history_age: Duration,

    /// Maximum tracked conversations before LRU eviction
    #[validate(range(min = 1))]
    pub max_concurrent_conversations: usize,

    /// Interval of the background cleanup pass
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Window within which a conversation counts as active for chaining
    #[serde(with = "humantime_serde")]
    pub recent_activity_window: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_length: 50,
            max_history_age: Duration::from_secs(24 * 60 * 60),
            max_concurrent_conversations: 10_000,
            cleanup_interval: Duration::from_secs(5 * 60),
            recent_activity_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Upstream provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Azure OpenAI Responses API
    #[validate(nested)]
    pub azure: Option<AzureSettings>,

    /// AWS Bedrock Converse API
    #[validate(nested)]
    pub bedrock: Option<BedrockSettings>,
}

impl ProvidersConfig {
    /// Ids of the configured providers
    #[must_use]
    pub fn configured_ids(&self) -> Vec<&'static str> {
        let mut ids = Vec::new();
        if self.azure.is_some() {
            ids.push(AZURE_PROVIDER_ID);
        }
        if self.bedrock.is_some() {
            ids.push(BEDROCK_PROVIDER_ID);
        }
        ids
    }
}

/// Azure OpenAI settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AzureSettings {
    /// Base URL, e.g. `https://my-resource.openai.azure.com/openai`
    #[validate(url)]
    pub base_url: String,

    /// API key
    #[serde(skip_serializing)]
    pub api_key: SecretString,

    /// `api-version` header value
    #[serde(default = "default_azure_api_version")]
    #[validate(length(min = 1))]
    pub api_version: String,

    /// Deployment name
    #[validate(length(min = 1))]
    pub deployment: String,

    /// Per-request timeout
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Accept plain-HTTP base URLs (local mocks only)
    #[serde(default)]
    pub allow_insecure_endpoint: bool,
}

/// AWS Bedrock settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BedrockSettings {
    /// Base URL, e.g. `https://bedrock-runtime.us-east-1.amazonaws.com`
    #[validate(url)]
    pub base_url: String,

    /// Bedrock API key (bearer token)
    #[serde(skip_serializing)]
    pub api_key: SecretString,

    /// AWS region
    #[validate(length(min = 1))]
    pub region: String,

    /// Per-request timeout
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Accept plain-HTTP base URLs (local mocks only)
    #[serde(default)]
    pub allow_insecure_endpoint: bool,
}

fn default_azure_api_version() -> String {
    "2025-04-01-preview".to_string()
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Model routing
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider used when no route matches
    pub default_provider: Option<String>,

    /// Prefix routes, first match wins
    #[validate(nested)]
    pub model_routes: Vec<ModelRoute>,
}

/// Route models with a name prefix to a provider
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModelRoute {
    /// Model name prefix
    #[validate(length(min = 1))]
    pub prefix: String,

    /// Target provider id
    #[validate(length(min = 1))]
    pub provider: String,
}
