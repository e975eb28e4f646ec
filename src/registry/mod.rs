//! Model registry: capability descriptors bound to backends.
//!
//! Populated once at startup and shared read-only (behind an `Arc`) by
//! every request afterwards.

pub mod catalog;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::middleware::{apply_all, Middleware};
use crate::provider::LanguageModel;
use crate::{BackendRequest, Error, Response};

/// Output cap assumed for ids the registry does not know.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Free,
    Pro,
    Experimental,
    Internal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub vision: bool,
    pub reasoning: bool,
    pub pdf: bool,
    pub experimental: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTier {
    pub requires_auth: bool,
    #[serde(rename = "pro")]
    pub requires_subscription: bool,
    pub free_unlimited: bool,
}

/// What a model can do and who may use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    #[serde(rename = "value")]
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(flatten)]
    pub access: AccessTier,
    pub max_output_tokens: u32,
    pub category: Category,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, category: Category) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            capabilities: Capabilities::default(),
            access: AccessTier::default(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            category,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn vision(mut self) -> Self {
        self.capabilities.vision = true;
        self
    }

    pub fn reasoning(mut self) -> Self {
        self.capabilities.reasoning = true;
        self
    }

    pub fn pdf(mut self) -> Self {
        self.capabilities.pdf = true;
        self
    }

    pub fn experimental(mut self) -> Self {
        self.capabilities.experimental = true;
        self
    }

    pub fn requires_auth(mut self) -> Self {
        self.access.requires_auth = true;
        self
    }

    pub fn pro(mut self) -> Self {
        self.access.requires_subscription = true;
        self
    }

    pub fn free_unlimited(mut self) -> Self {
        self.access.free_unlimited = true;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }
}

/// The backend half of a binding, as supplied at registration.
#[derive(Clone)]
pub struct BackendHandle {
    pub backend: Arc<dyn LanguageModel>,
    /// Model name the vendor expects, e.g. `gemini-2.5-flash`.
    pub upstream_model: String,
    pub middleware: Vec<Middleware>,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn LanguageModel>, upstream_model: impl Into<String>) -> Self {
        Self {
            backend,
            upstream_model: upstream_model.into(),
            middleware: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// A descriptor plus the backend and middleware that serve it.
#[derive(Clone)]
pub struct ProviderBinding {
    descriptor: ModelDescriptor,
    handle: BackendHandle,
}

impl std::fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("model", &self.descriptor.id)
            .field("provider", &self.handle.backend.provider_name())
            .field("upstream_model", &self.handle.upstream_model)
            .field("middleware", &self.handle.middleware)
            .finish()
    }
}

impl ProviderBinding {
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn provider_name(&self) -> &str {
        self.handle.backend.provider_name()
    }

    pub fn upstream_model(&self) -> &str {
        &self.handle.upstream_model
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.handle.middleware
    }

    /// Run one backend round with this binding's middleware applied.
    pub async fn generate(&self, request: &BackendRequest) -> Result<Response, Error> {
        let response = self.handle.backend.generate(request).await?;
        let pipeline = self.handle.middleware.clone();
        Ok(response.map_stream(move |stream| apply_all(&pipeline, stream)))
    }
}

/// Who is asking. Supplied by the surrounding auth layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub authenticated: bool,
    pub pro: bool,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn full_access() -> Self {
        Self {
            authenticated: true,
            pro: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    ModelNotFound,
    AuthenticationRequired,
    ProSubscriptionRequired,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::ModelNotFound => "model_not_found",
            DenialReason::AuthenticationRequired => "authentication_required",
            DenialReason::ProSubscriptionRequired => "pro_subscription_required",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Registered models, in registration order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    order: Vec<String>,
    bindings: HashMap<String, ProviderBinding>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ModelDescriptor, handle: BackendHandle) -> Result<(), Error> {
        if descriptor.max_output_tokens == 0 {
            return Err(Error::InvalidDescriptor {
                model: descriptor.id,
                reason: "maxOutputTokens must be positive".to_string(),
            });
        }
        if descriptor.id.trim().is_empty() {
            return Err(Error::InvalidDescriptor {
                model: descriptor.id,
                reason: "identifier must not be empty".to_string(),
            });
        }
        if self.bindings.contains_key(&descriptor.id) {
            return Err(Error::DuplicateModel(descriptor.id));
        }

        tracing::debug!(
            model = %descriptor.id,
            provider = handle.backend.provider_name(),
            upstream_model = %handle.upstream_model,
            middleware = handle.middleware.len(),
            "registered model"
        );
        self.order.push(descriptor.id.clone());
        self.bindings
            .insert(descriptor.id.clone(), ProviderBinding { descriptor, handle });
        Ok(())
    }

    pub fn resolve(&self, model_id: &str) -> Result<&ProviderBinding, Error> {
        self.bindings
            .get(model_id)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))
    }

    pub fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.bindings.get(model_id).map(|b| &b.descriptor)
    }

    /// All descriptors in registration order.
    pub fn list_capabilities(&self) -> Vec<&ModelDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.descriptor(id))
            .collect()
    }

    pub fn can_use_model(&self, model_id: &str, caller: &CallerContext) -> AccessDecision {
        let Some(model) = self.descriptor(model_id) else {
            return AccessDecision::Denied(DenialReason::ModelNotFound);
        };
        if model.access.requires_auth && !caller.authenticated {
            return AccessDecision::Denied(DenialReason::AuthenticationRequired);
        }
        if model.access.requires_subscription && !caller.pro {
            return AccessDecision::Denied(DenialReason::ProSubscriptionRequired);
        }
        AccessDecision::Allowed
    }

    pub fn should_bypass_rate_limits(&self, model_id: &str, caller: &CallerContext) -> bool {
        caller.authenticated
            && self
                .descriptor(model_id)
                .is_some_and(|m| m.access.free_unlimited)
    }

    pub fn accepted_file_types(&self, model_id: &str, caller_is_pro: bool) -> &'static str {
        match self.descriptor(model_id) {
            Some(m) if m.capabilities.pdf && caller_is_pro => "image/*,.pdf",
            _ => "image/*",
        }
    }

    pub fn max_output_tokens(&self, model_id: &str) -> u32 {
        self.descriptor(model_id)
            .map_or(DEFAULT_MAX_OUTPUT_TOKENS, |m| m.max_output_tokens)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
