//! Provider routing.
//!
//! The first route whose prefix matches the model wins. Without a match the
//! default provider is used, and without a default the only configured
//! provider.

use gateway_core::{GatewayError, GatewayResult};
use gateway_providers::ProviderClient;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Chooses the provider for a model
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    routes: Vec<(String, String)>,
    default_provider: Option<String>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.providers.keys().collect();
        ids.sort();
        f.debug_struct("ProviderRouter")
            .field("providers", &ids)
            .field("routes", &self.routes)
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

impl ProviderRouter {
    /// Create a router over `providers`, keyed by their ids
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn ProviderClient>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.id().to_string(), p))
                .collect(),
            routes: Vec::new(),
            default_provider: None,
        }
    }

    /// Add a prefix route
    #[must_use]
    pub fn with_route(mut self, prefix: impl Into<String>, provider: impl Into<String>) -> Self {
        self.routes.push((prefix.into(), provider.into()));
        self
    }

    /// Set the default provider
    #[must_use]
    pub fn with_default(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    /// Default provider id
    #[must_use]
    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Ids referenced by routes or the default but not registered
    #[must_use]
    pub fn unknown_targets(&self) -> Vec<String> {
        let mut unknown: Vec<String> = self
            .routes
            .iter()
            .map(|(_, provider)| provider)
            .chain(self.default_provider.iter())
            .filter(|id| !self.providers.contains_key(id.as_str()))
            .cloned()
            .collect();
        unknown.sort();
        unknown.dedup();
        unknown
    }

    /// Registered provider
    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&Arc<dyn ProviderClient>> {
        self.providers.get(id)
    }

    /// All registered providers, sorted by id
    pub fn providers(&self) -> Vec<&Arc<dyn ProviderClient>> {
        let mut all: Vec<_> = self.providers.values().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider for `model`
    ///
    /// # Errors
    /// Returns a validation error if the resolved provider is not registered
    /// or no provider can be chosen
    pub fn route(&self, model: &str) -> GatewayResult<Arc<dyn ProviderClient>> {
        let target = self
            .routes
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, provider)| provider.as_str())
            .or(self.default_provider.as_deref());

        let provider = match target {
            Some(id) => self.providers.get(id).ok_or_else(|| {
                GatewayError::validation_field(format!("Unknown provider '{id}'"), "model")
            })?,
            None if self.providers.len() == 1 => self
                .providers
                .values()
                .next()
                .ok_or_else(|| GatewayError::internal("provider map changed while routing"))?,
            None => {
                return Err(GatewayError::validation_field(
                    format!("No provider configured for model '{model}'"),
                    "model",
                ))
            }
        };

        debug!(model = %model, provider = %provider.id(), "Routed request");
        Ok(Arc::clone(provider))
    }
}
