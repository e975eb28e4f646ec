use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::middleware::{ChunkPolicy, Middleware, TagConfig};
use crate::provider::LanguageModel;
use crate::providers::{Delivery, OpenAiCompatibleBackend};
use crate::registry::catalog::CatalogEntry;
use crate::registry::{BackendHandle, ProviderRegistry};
use crate::resilience::ResilientClient;
use crate::Error;

/// Upstream vendors. All of them are reached through their
/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Google,
    Groq,
    Xai,
    OpenAi,
    Anthropic,
    Mistral,
    HuggingFace,
}

impl Vendor {
    pub const ALL: [Vendor; 7] = [
        Vendor::Google,
        Vendor::Groq,
        Vendor::Xai,
        Vendor::OpenAi,
        Vendor::Anthropic,
        Vendor::Mistral,
        Vendor::HuggingFace,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Google => "google",
            Vendor::Groq => "groq",
            Vendor::Xai => "xai",
            Vendor::OpenAi => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Mistral => "mistral",
            Vendor::HuggingFace => "huggingface",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Vendor::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Vendor::Groq => "https://api.groq.com/openai/v1",
            Vendor::Xai => "https://api.x.ai/v1",
            Vendor::OpenAi => "https://api.openai.com/v1",
            Vendor::Anthropic => "https://api.anthropic.com/v1",
            Vendor::Mistral => "https://api.mistral.ai/v1",
            Vendor::HuggingFace => "https://router.huggingface.co/v1",
        }
    }

    /// Environment variable holding the vendor's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Vendor::Google => "GOOGLE_GENERATIVE_AI_API_KEY",
            Vendor::Groq => "GROQ_API_KEY",
            Vendor::Xai => "XAI_API_KEY",
            Vendor::OpenAi => "OPENAI_API_KEY",
            Vendor::Anthropic => "ANTHROPIC_API_KEY",
            Vendor::Mistral => "MISTRAL_API_KEY",
            Vendor::HuggingFace => "HF_TOKEN",
        }
    }

    /// Environment variable overriding the vendor's base URL.
    pub fn base_url_env(&self) -> String {
        format!("{}_BASE_URL", self.name().to_ascii_uppercase())
    }
}

/// Builds backends and the registry from configuration.
///
/// Backends are shared: every model served by the same vendor with the
/// same delivery mode uses one backend instance.
pub struct BackendFactory {
    client: ResilientClient,
    api_keys: HashMap<Vendor, String>,
    base_urls: HashMap<Vendor, String>,
    backends: HashMap<(Vendor, Delivery), Arc<dyn LanguageModel>>,
}

impl BackendFactory {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            client,
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            backends: HashMap::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig, client: ResilientClient) -> Self {
        let mut factory = Self::new(client);
        factory.api_keys = config.api_keys.clone();
        factory.base_urls = config.base_urls.clone();
        factory
    }

    pub fn with_api_key(mut self, vendor: Vendor, key: impl Into<String>) -> Self {
        self.api_keys.insert(vendor, key.into());
        self
    }

    pub fn with_base_url(mut self, vendor: Vendor, url: impl Into<String>) -> Self {
        self.base_urls.insert(vendor, url.into());
        self
    }

    pub fn backend(&mut self, vendor: Vendor, delivery: Delivery) -> Arc<dyn LanguageModel> {
        let client = &self.client;
        let api_keys = &self.api_keys;
        let base_urls = &self.base_urls;
        self.backends
            .entry((vendor, delivery))
            .or_insert_with(|| {
                let base_url = base_urls
                    .get(&vendor)
                    .cloned()
                    .unwrap_or_else(|| vendor.default_base_url().to_string());
                let api_key = api_keys.get(&vendor).cloned();
                if api_key.is_none() {
                    tracing::warn!(
                        vendor = vendor.name(),
                        env = vendor.api_key_env(),
                        "no API key configured; requests to this vendor will fail"
                    );
                }
                Arc::new(
                    OpenAiCompatibleBackend::new(client.clone(), vendor.name(), base_url, api_key)
                        .with_delivery(delivery),
                )
            })
            .clone()
    }

    /// Bind each catalog entry to its vendor backend.
    pub fn build_registry(&mut self, entries: Vec<CatalogEntry>) -> Result<ProviderRegistry, Error> {
        let mut registry = ProviderRegistry::new();
        for entry in entries {
            let backend = self.backend(entry.vendor, entry.delivery);
            let mut handle = BackendHandle::new(backend, entry.upstream_model);
            if entry.extract_reasoning {
                handle = handle.with_middleware(Middleware::reasoning(TagConfig::think()));
            }
            if entry.delivery == Delivery::Buffered {
                handle = handle.with_middleware(Middleware::simulated(ChunkPolicy::default()));
            }
            registry.register(entry.descriptor, handle)?;
        }
        tracing::info!(models = registry.len(), "model registry ready");
        Ok(registry)
    }
}
