pub mod anthropic;
pub mod openai;

pub(crate) mod http;
pub(crate) mod sse;

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info};

use parley_core::config::LlmConfig;
use parley_tool_runtime::provider::{ConnectionAdapter, ConnectionError};

use crate::catalog::ModelCatalog;
use anthropic::AnthropicAdapter;
use openai::OpenAiCompatibleAdapter;

/// A model id resolved to the adapter that serves it.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: String,
    /// Model id as the provider expects it (routing prefix removed).
    pub model: String,
    pub adapter: Arc<dyn ConnectionAdapter>,
}

/// Provider family a bare model id belongs to.
pub fn family_for_model(model: &str) -> Option<&'static str> {
    let model = model.to_ascii_lowercase();
    if model.starts_with("claude") {
        return Some("anthropic");
    }
    if ["gpt", "o1", "o3", "o4", "chatgpt"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
    {
        return Some("openai");
    }
    None
}

/// Configured adapters keyed by provider name, in registration order.
pub struct AdapterRegistry {
    adapters: IndexMap<String, Arc<dyn ConnectionAdapter>>,
    catalogs: IndexMap<String, Arc<dyn ModelCatalog>>,
    fallback: String,
}

impl AdapterRegistry {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            adapters: IndexMap::new(),
            catalogs: IndexMap::new(),
            fallback: fallback.into(),
        }
    }

    /// Every provider with credentials in `config`.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut registry = Self::new(config.fallback_provider.clone());

        if let Some(key) = &config.anthropic_api_key {
            let mut adapter = AnthropicAdapter::new(key.clone());
            if let Some(url) = &config.anthropic_base_url {
                adapter = adapter.with_base_url(url.clone());
            }
            registry.register("anthropic", Arc::new(adapter));
        }
        if let Some(key) = &config.openai_api_key {
            let mut adapter = OpenAiCompatibleAdapter::openai(key.clone());
            if let Some(url) = &config.openai_base_url {
                adapter = adapter.with_base_url(url.clone());
            }
            registry.register("openai", Arc::new(adapter));
        }
        if let Some(key) = &config.groq_api_key {
            registry.register("groq", Arc::new(OpenAiCompatibleAdapter::groq(key.clone())));
        }
        if let Some(key) = &config.openrouter_api_key {
            registry.register(
                "openrouter",
                Arc::new(OpenAiCompatibleAdapter::openrouter(key.clone())),
            );
        }
        if let Some(url) = &config.ollama_url {
            registry.register(
                "ollama",
                Arc::new(OpenAiCompatibleAdapter::ollama(Some(url.as_str()))),
            );
        }

        info!(
            providers = ?registry.names(),
            fallback = %registry.fallback,
            "adapter registry ready"
        );
        registry
    }

    /// Register a provider under `name`. Replaces an earlier one with the same name.
    pub fn register<P>(&mut self, name: &str, provider: Arc<P>)
    where
        P: ConnectionAdapter + ModelCatalog + 'static,
    {
        self.adapters
            .insert(name.to_string(), provider.clone() as Arc<dyn ConnectionAdapter>);
        self.catalogs
            .insert(name.to_string(), provider as Arc<dyn ModelCatalog>);
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConnectionAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn catalog(&self, name: &str) -> Option<Arc<dyn ModelCatalog>> {
        self.catalogs.get(name).cloned()
    }

    pub fn catalogs(&self) -> impl Iterator<Item = &Arc<dyn ModelCatalog>> {
        self.catalogs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Pick the adapter for a model id.
    ///
    /// `provider/model` routes explicitly when `provider` is registered.
    /// Otherwise the model family decides, then the fallback provider.
    pub fn resolve(&self, model: &str) -> Result<ResolvedModel, ConnectionError> {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(adapter) = self.adapters.get(prefix) {
                return Ok(self.resolved(prefix, rest, adapter));
            }
        }

        let provider = family_for_model(model)
            .filter(|family| self.adapters.contains_key(*family))
            .unwrap_or(self.fallback.as_str());

        match self.adapters.get(provider) {
            Some(adapter) => Ok(self.resolved(provider, model, adapter)),
            None => Err(ConnectionError::NotConfigured(format!(
                "no provider configured for model '{}' (fallback '{}' is not configured)",
                model, self.fallback
            ))),
        }
    }

    fn resolved(&self, provider: &str, model: &str, adapter: &Arc<dyn ConnectionAdapter>) -> ResolvedModel {
        debug!(provider, model, "resolved model");
        ResolvedModel {
            provider: provider.to_string(),
            model: model.to_string(),
            adapter: adapter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            fallback_provider: "openrouter".into(),
            anthropic_api_key: Some("sk-ant".into()),
            anthropic_base_url: None,
            anthropic_model: "claude-sonnet-4-5".into(),
            openai_api_key: Some("sk-openai".into()),
            openai_base_url: None,
            openai_model: "gpt-4o".into(),
            groq_api_key: Some("gsk".into()),
            openrouter_api_key: Some("sk-or".into()),
            ollama_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    #[test]
    fn test_family_heuristic() {
        assert_eq!(family_for_model("claude-sonnet-4-5"), Some("anthropic"));
        assert_eq!(family_for_model("gpt-4o-mini"), Some("openai"));
        assert_eq!(family_for_model("o3-mini"), Some("openai"));
        assert_eq!(family_for_model("chatgpt-4o-latest"), Some("openai"));
        assert_eq!(family_for_model("llama-3.3-70b"), None);
    }

    #[test]
    fn test_registry_from_config_keeps_order() {
        let registry = AdapterRegistry::from_config(&config());
        assert_eq!(registry.names(), vec!["anthropic", "openai", "groq", "openrouter"]);
        assert!(registry.catalog("groq").is_some());
        assert_eq!(registry.catalogs().count(), 4);
    }

    #[test]
    fn test_resolve_by_family_prefix_and_fallback() {
        let registry = AdapterRegistry::from_config(&config());

        let claude = registry.resolve("claude-sonnet-4-5").unwrap();
        assert_eq!(claude.provider, "anthropic");
        assert_eq!(claude.adapter.provider_name(), "anthropic");

        let groq = registry.resolve("groq/llama-3.3-70b-versatile").unwrap();
        assert_eq!(groq.provider, "groq");
        assert_eq!(groq.model, "llama-3.3-70b-versatile");

        // unknown prefix is part of the model id
        let routed = registry.resolve("meta-llama/llama-3.3-70b-instruct").unwrap();
        assert_eq!(routed.provider, "openrouter");
        assert_eq!(routed.model, "meta-llama/llama-3.3-70b-instruct");
    }

    #[test]
    fn test_family_without_credentials_uses_fallback() {
        let mut cfg = config();
        cfg.openai_api_key = None;
        let registry = AdapterRegistry::from_config(&cfg);
        assert_eq!(registry.resolve("gpt-4o").unwrap().provider, "openrouter");
    }

    #[test]
    fn test_unconfigured_fallback_errors() {
        let registry = AdapterRegistry::new("anthropic");
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve("mistral-large"),
            Err(ConnectionError::NotConfigured(_))
        ));
    }
}
