//! HTTP surface: `POST /api/search` streams a generation as SSE frames,
//! `GET /api/models` lists the offered models.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::config::GatewayConfig;
use crate::controller::{GenerationController, GenerationRequest};
use crate::registry::catalog::DEFAULT_MODEL;
use crate::registry::{AccessDecision, CallerContext, Category, DenialReason};
use crate::tools::ToolSet;
use crate::transport::sse_body;
use crate::types::{Conversation, ConversationItem, EventPayload, GenerationConfig, Role, ToolChoice};
use crate::Error;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub controller: GenerationController,
    /// Tools offered when a request does not name any.
    pub tools: ToolSet,
    pub config: Arc<GatewayConfig>,
    /// Access level assumed for every caller.
    pub caller: CallerContext,
}

impl AppState {
    pub fn new(controller: GenerationController, tools: ToolSet, config: GatewayConfig) -> Self {
        let caller = if config.auth_disabled {
            CallerContext::full_access()
        } else {
            CallerContext::anonymous()
        };
        Self {
            controller,
            tools,
            config: Arc::new(config),
            caller,
        }
    }

    pub fn with_caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search).options(preflight))
        .route("/api/models", get(models))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    messages: Vec<IncomingMessage>,
    model: Option<String>,
    tools: Option<Vec<String>>,
    #[serde(default)]
    config: RequestOptions,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: Role,
    content: Option<String>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RequestOptions {
    tool_choice: Option<ToolChoice>,
    timezone: Option<String>,
    search_provider: Option<String>,
    system_prompt: Option<String>,
    max_tool_rounds: Option<u32>,
}

impl IncomingMessage {
    /// Plain `content` wins; otherwise the text parts are joined.
    fn text(&self) -> String {
        match &self.content {
            Some(content) => content.clone(),
            None => self
                .parts
                .iter()
                .filter(|part| part.kind == "text")
                .map(|part| part.text.as_str())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A JSON error returned before any frame was streamed.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn denied(model: &str, reason: DenialReason) -> Self {
        let status = match reason {
            DenialReason::ModelNotFound => StatusCode::BAD_REQUEST,
            _ => StatusCode::FORBIDDEN,
        };
        Self::new(status, reason.code(), format!("access to model {model} denied"))
    }

    fn from_error(error: &Error) -> Self {
        let status = match error {
            Error::UnknownModel(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Error::ProviderTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.kind(), error.to_string())
    }

    /// Map an `error` event seen before streaming started.
    fn from_event(kind: &str, message: &str) -> Self {
        let status = match kind {
            "ProviderTimeoutError" => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, kind, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.error, "message": self.message }));
        let mut response = (self.status, body).into_response();
        allow_any_origin(response.headers_mut());
        response
    }
}

fn allow_any_origin(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    allow_any_origin(headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

async fn models(State(state): State<AppState>) -> Response {
    let offered: Vec<_> = state
        .controller
        .registry()
        .list_capabilities()
        .into_iter()
        .filter(|model| model.category != Category::Internal)
        .collect();
    let mut response = Json(json!({ "models": offered })).into_response();
    allow_any_origin(response.headers_mut());
    response
}

async fn search(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: SearchBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed request body: {e}")))?;
    if body.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let model = body.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let registry = state.controller.registry();
    registry
        .resolve(&model)
        .map_err(|e| ApiError::from_error(&e))?;
    if let AccessDecision::Denied(reason) = registry.can_use_model(&model, &state.caller) {
        tracing::info!(model = %model, reason = reason.code(), "model access denied");
        return Err(ApiError::denied(&model, reason));
    }

    let tools = match &body.tools {
        Some(names) => state
            .tools
            .select(names)
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => state.tools.clone(),
    };

    let conversation: Conversation = body
        .messages
        .iter()
        .map(|message| match message.role {
            Role::System => ConversationItem::system(message.text()),
            Role::User => ConversationItem::user(message.text()),
            Role::Assistant => ConversationItem::assistant(message.text()),
        })
        .collect::<Vec<_>>()
        .into();

    let config = generation_config(&state.config, body.config);
    let request = GenerationRequest::new(conversation, model.clone())
        .with_tools(tools)
        .with_config(config);
    let handle = state
        .controller
        .start(request)
        .map_err(|e| ApiError::from_error(&e))?;
    let request_id = handle.request_id().to_string();
    tracing::info!(request_id = %request_id, model = %model, "search request accepted");

    let mut events = handle.into_events();
    let first = match events.next().await {
        Some(event) => event,
        None => {
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "StreamingError",
                "generation ended without producing an event",
            ))
        }
    };
    if let EventPayload::Error { kind, message } = &first.payload {
        tracing::warn!(request_id = %request_id, kind = %kind, "generation failed before streaming");
        return Err(ApiError::from_event(kind, message));
    }

    let frames = sse_body(futures_util::stream::once(async move { first }).chain(events));
    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    allow_any_origin(headers);
    Ok(response)
}

fn generation_config(gateway: &GatewayConfig, options: RequestOptions) -> GenerationConfig {
    let mut config = GenerationConfig::default()
        .with_deadline(gateway.request_timeout)
        .with_retry(gateway.retry_policy())
        .with_max_tool_rounds(
            options
                .max_tool_rounds
                .map_or(gateway.max_tool_rounds, |rounds| rounds.min(gateway.max_tool_rounds)),
        );
    if let Some(choice) = options.tool_choice {
        config = config.with_tool_choice(choice);
    }
    if let Some(timezone) = options.timezone {
        config = config.with_timezone(timezone);
    }
    if let Some(prompt) = options.system_prompt {
        config = config.with_system_prompt(prompt);
    }
    config.search_provider = options.search_provider;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_from_parts() {
        let message: IncomingMessage = serde_json::from_value(json!({
            "role": "user",
            "parts": [
                {"type": "text", "text": "what time "},
                {"type": "file", "url": "https://example.com/a.png"},
                {"type": "text", "text": "is it?"}
            ]
        }))
        .unwrap();
        assert_eq!(message.text(), "what time is it?");

        let plain: IncomingMessage =
            serde_json::from_value(json!({"role": "assistant", "content": "hi"})).unwrap();
        assert_eq!(plain.text(), "hi");
    }

    #[test]
    fn request_options_override_gateway_defaults() {
        let gateway = GatewayConfig::default();
        let options: RequestOptions = serde_json::from_value(json!({
            "toolChoice": "none",
            "timezone": "+05:30",
            "maxToolRounds": 2
        }))
        .unwrap();
        let config = generation_config(&gateway, options);
        assert_eq!(config.tool_choice, ToolChoice::None);
        assert_eq!(config.timezone, "+05:30");
        assert_eq!(config.max_tool_rounds, 2);
        assert_eq!(config.deadline, gateway.request_timeout);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn client_tool_rounds_are_capped_by_gateway() {
        let gateway = GatewayConfig {
            max_tool_rounds: 3,
            ..GatewayConfig::default()
        };
        let options: RequestOptions =
            serde_json::from_value(json!({"maxToolRounds": 1000})).unwrap();
        assert_eq!(generation_config(&gateway, options).max_tool_rounds, 3);

        let options: RequestOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(generation_config(&gateway, options).max_tool_rounds, 3);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            ApiError::from_error(&Error::UnknownModel("x".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from_event("ProviderTimeoutError", "slow").status,
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            ApiError::denied("scira-5", DenialReason::ProSubscriptionRequired).status,
            StatusCode::FORBIDDEN
        );
    }
}
