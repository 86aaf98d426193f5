//! Gateway construction.
//!
//! [`GatewayBuilder::from_config`] turns the configuration schema into the
//! runtime stack. Each provider gets its own breaker and retry policies; the
//! fallback handler is shared.

use crate::gateway::Gateway;
use crate::router::ProviderRouter;
use gateway_config::{
    AzureSettings, BedrockSettings, CircuitBreakerSettings, ConversationConfig, FallbackSettings,
    GatewayConfig, LimitsConfig, RetrySettings, AZURE_PROVIDER_ID, BEDROCK_PROVIDER_ID,
};
use gateway_continuity::{ContinuityConfig, ConversationManager, ConversationStore, InMemoryConversationStore};
use gateway_core::{InboundFormat, RequestLimits};
use gateway_providers::{
    AzureClient, AzureClientConfig, BedrockClient, BedrockClientConfig, ProviderClient,
    ProviderConfigError, TransformLimits,
};
use gateway_resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, FallbackConfig, FallbackHandler,
    ResilientExecutor, RetryConfig, RetryPolicy, RetryableErrors,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Gateway construction errors
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A provider client rejected its configuration
    #[error("Provider '{provider}' configuration error: {source}")]
    Provider {
        /// Provider id
        provider: &'static str,
        /// Underlying error
        #[source]
        source: ProviderConfigError,
    },

    /// No provider is configured
    #[error("No provider configured")]
    NoProviders,

    /// A route or the default targets a provider that is not configured
    #[error("Unknown provider(s) in routing: {0:?}")]
    UnknownProvider(Vec<String>),
}

/// Breaker settings as runtime configuration
#[must_use]
pub fn breaker_config(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        cooldown: settings.cooldown,
    }
}

/// Retry settings as runtime configuration
#[must_use]
pub fn retry_config(settings: &RetrySettings) -> RetryConfig {
    RetryConfig {
        max_attempts: settings.max_attempts,
        base_delay: settings.base_delay,
        max_delay: settings.max_delay,
        backoff_multiplier: settings.backoff_multiplier,
        jitter_factor: settings.jitter_factor,
        timeout: settings.timeout,
        retryable: RetryableErrors {
            status_codes: settings.retryable_status_codes.iter().copied().collect(),
            ..RetryableErrors::default()
        },
    }
}

/// Fallback settings as runtime configuration
///
/// # Errors
/// Returns an error for a placeholder keyed by an unknown format
pub fn fallback_config(settings: &FallbackSettings) -> Result<FallbackConfig, BuildError> {
    let format_placeholders = settings
        .format_placeholders
        .iter()
        .map(|(format, text)| {
            format
                .parse::<InboundFormat>()
                .map(|format| (format, text.clone()))
                .map_err(|e| BuildError::Config(format!("resilience.fallback.format_placeholders: {e}")))
        })
        .collect::<Result<_, _>>()?;

    Ok(FallbackConfig {
        enabled: settings.enabled,
        degradable_operations: settings.degradable_operations.iter().cloned().collect(),
        placeholder_text: settings.placeholder_text.clone(),
        format_placeholders,
        retry_after: settings.retry_after,
    })
}

/// Request limits section as runtime limits
#[must_use]
pub fn request_limits(limits: &LimitsConfig) -> RequestLimits {
    RequestLimits {
        max_messages: limits.max_messages,
        max_message_length: limits.max_message_length,
    }
}

/// Transform limits section as runtime limits
#[must_use]
pub fn transform_limits(limits: &LimitsConfig) -> TransformLimits {
    TransformLimits {
        max_response_size: limits.max_response_size,
        max_choices_count: limits.max_choices_count,
        max_completion_length: limits.max_completion_length,
    }
}

/// Conversation section as continuity configuration
#[must_use]
pub fn continuity_config(conversation: &ConversationConfig) -> ContinuityConfig {
    ContinuityConfig {
        max_history_length: conversation.max_history_length,
        max_history_age: conversation.max_history_age,
        max_concurrent_conversations: conversation.max_concurrent_conversations,
        recent_activity_window: conversation.recent_activity_window,
    }
}

fn azure_client_config(settings: &AzureSettings) -> AzureClientConfig {
    AzureClientConfig {
        base_url: settings.base_url.clone(),
        api_key: settings.api_key.clone(),
        api_version: settings.api_version.clone(),
        deployment: settings.deployment.clone(),
        timeout: settings.timeout,
        allow_insecure_endpoint: settings.allow_insecure_endpoint,
    }
}

fn bedrock_client_config(settings: &BedrockSettings) -> BedrockClientConfig {
    BedrockClientConfig {
        base_url: settings.base_url.clone(),
        api_key: settings.api_key.clone(),
        region: settings.region.clone(),
        timeout: settings.timeout,
        allow_insecure_endpoint: settings.allow_insecure_endpoint,
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    providers: Vec<Arc<dyn ProviderClient>>,
    routes: Vec<(String, String)>,
    default_provider: Option<String>,
    limits: RequestLimits,
    continuity: ContinuityConfig,
    store: Option<Arc<dyn ConversationStore>>,
    breakers: Arc<CircuitBreakerRegistry>,
    development_mode: bool,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("providers", &self.providers.iter().map(|p| p.id()).collect::<Vec<_>>())
            .field("routes", &self.routes)
            .field("default_provider", &self.default_provider)
            .field("continuity", &self.continuity)
            .field("development_mode", &self.development_mode)
            .finish_non_exhaustive()
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Empty builder with default limits and continuity settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            routes: Vec::new(),
            default_provider: None,
            limits: RequestLimits::default(),
            continuity: ContinuityConfig::default(),
            store: None,
            breakers: Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            development_mode: false,
        }
    }

    /// Builder carrying every provider and setting from `config`
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a provider client
    /// rejects its settings
    pub fn from_config(config: &GatewayConfig) -> Result<Self, BuildError> {
        config.validate_config().map_err(BuildError::Config)?;

        let resilience = &config.resilience;
        let fallback = Arc::new(FallbackHandler::new(fallback_config(&resilience.fallback)?));
        let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_config(
            &resilience.circuit_breaker,
        )));
        let limits = transform_limits(&config.limits);
        let executor = |provider: &str| {
            ResilientExecutor::new(
                breakers.get_or_create(provider),
                Arc::new(RetryPolicy::new(retry_config(&resilience.retry))),
                Arc::new(RetryPolicy::new(retry_config(&resilience.streaming_retry))),
                Arc::clone(&fallback),
            )
        };

        let mut builder = Self {
            breakers: Arc::clone(&breakers),
            limits: request_limits(&config.limits),
            continuity: continuity_config(&config.conversation),
            development_mode: resilience.development_mode,
            default_provider: config.routing.default_provider.clone(),
            routes: config
                .routing
                .model_routes
                .iter()
                .map(|r| (r.prefix.clone(), r.provider.clone()))
                .collect(),
            ..Self::new()
        };

        if let Some(settings) = &config.providers.azure {
            let client = AzureClient::new(azure_client_config(settings), limits, executor(AZURE_PROVIDER_ID))
                .map_err(|source| BuildError::Provider {
                    provider: AZURE_PROVIDER_ID,
                    source,
                })?;
            info!(endpoint = %client.endpoint(), "Azure provider configured");
            builder = builder.with_provider(Arc::new(client));
        }

        if let Some(settings) = &config.providers.bedrock {
            let client = BedrockClient::new(
                bedrock_client_config(settings),
                limits,
                executor(BEDROCK_PROVIDER_ID),
            )
            .map_err(|source| BuildError::Provider {
                provider: BEDROCK_PROVIDER_ID,
                source,
            })?;
            info!(region = %settings.region, "Bedrock provider configured");
            builder = builder.with_provider(Arc::new(client));
        }

        Ok(builder)
    }

    /// Register a provider client
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ProviderClient>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Route models starting with `prefix` to `provider`
    #[must_use]
    pub fn with_route(mut self, prefix: impl Into<String>, provider: impl Into<String>) -> Self {
        self.routes.push((prefix.into(), provider.into()));
        self
    }

    /// Provider used when no route matches
    #[must_use]
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    /// Request limits
    #[must_use]
    pub fn with_request_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Continuity settings
    #[must_use]
    pub fn with_continuity(mut self, config: ContinuityConfig) -> Self {
        self.continuity = config;
        self
    }

    /// Conversation store, in-process by default
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Include debug details in client errors
    #[must_use]
    pub fn development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    /// Build the gateway
    ///
    /// # Errors
    /// Returns an error if no provider is registered or routing names an
    /// unregistered provider
    pub fn build(self) -> Result<Gateway, BuildError> {
        if self.providers.is_empty() {
            return Err(BuildError::NoProviders);
        }

        let mut router = ProviderRouter::new(self.providers);
        for (prefix, provider) in self.routes {
            router = router.with_route(prefix, provider);
        }
        if let Some(default) = self.default_provider {
            router = router.with_default(default);
        }
        let unknown = router.unknown_targets();
        if !unknown.is_empty() {
            return Err(BuildError::UnknownProvider(unknown));
        }
        if router.len() > 1 && router.default_provider().is_none() {
            warn!("Several providers configured without a default; unrouted models will be rejected");
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new()));
        let conversations = Arc::new(ConversationManager::new(self.continuity, store));

        info!(
            providers = router.len(),
            development_mode = self.development_mode,
            "Gateway initialized"
        );
        Ok(Gateway::new(
            router,
            conversations,
            self.breakers,
            self.limits,
            self.development_mode,
        ))
    }
}
