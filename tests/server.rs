mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use stream_gateway::config::GatewayConfig;
use stream_gateway::controller::GenerationController;
use stream_gateway::registry::{BackendHandle, CallerContext, Category, ModelDescriptor, ProviderRegistry};
use stream_gateway::server::{router, AppState};
use stream_gateway::tools::ToolSet;
use stream_gateway::{BackendEvent, BackendFinish, Usage};
use support::{text, ScriptedBackend, Step};
use tower::ServiceExt;

fn app_with(backend: Arc<ScriptedBackend>, config: GatewayConfig, caller: CallerContext) -> Router {
    let mut registry = ProviderRegistry::new();
    registry
        .register(
            ModelDescriptor::new("scira-default", "Default", Category::Free).free_unlimited(),
            BackendHandle::new(backend.clone(), "gemini-2.5-flash"),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::new("scira-grok-4", "Grok 4", Category::Pro)
                .requires_auth()
                .pro(),
            BackendHandle::new(backend.clone(), "grok-4"),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::new("scira-name", "Titles", Category::Internal),
            BackendHandle::new(backend, "llama"),
        )
        .unwrap();

    let controller = GenerationController::new(Arc::new(registry));
    router(AppState::new(controller, ToolSet::new(), config).with_caller(caller))
}

fn app(backend: Arc<ScriptedBackend>) -> Router {
    app_with(backend, GatewayConfig::default(), CallerContext::anonymous())
}

fn post(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/search")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn hello_backend() -> Arc<ScriptedBackend> {
    ScriptedBackend::new(vec![vec![
        text("Hello"),
        text(" there"),
        Step::Event(BackendEvent::Done {
            finish_reason: BackendFinish::Stop,
            usage: Usage::new(5, 2),
        }),
    ]])
}

#[tokio::test]
async fn test_search_streams_sse_frames() {
    let response = app(hello_backend())
        .oneshot(post(json!({
            "messages": [{"role": "user", "parts": [{"type": "text", "text": "hi"}]}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["access-control-allow-origin"], "*");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<Value> = body
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| serde_json::from_str(frame.strip_prefix("data: ").unwrap()).unwrap())
        .collect();

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["type"], "text-delta");
    assert_eq!(frames[0]["seq"], 0);
    assert_eq!(frames[0]["data"]["text"], "Hello");
    assert_eq!(frames[2]["type"], "finish");
    assert_eq!(frames[2]["seq"], 2);
    assert_eq!(frames[2]["data"]["model"], "scira-default");
    assert_eq!(frames[2]["data"]["usage"]["totalTokens"], 7);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let response = app(hello_backend())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/search")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "bad_request");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_unknown_model_is_400() {
    let response = app(hello_backend())
        .oneshot(post(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "scira-nope"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "UnknownModelError");
}

#[tokio::test]
async fn test_access_denied_is_403_with_reason() {
    let backend = hello_backend();
    let response = app(backend.clone())
        .oneshot(post(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "scira-grok-4"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "authentication_required");

    let signed_in = CallerContext {
        authenticated: true,
        pro: false,
    };
    let response = app_with(backend.clone(), GatewayConfig::default(), signed_in)
        .oneshot(post(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "scira-grok-4"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "pro_subscription_required");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_before_streaming_is_408() {
    let config = GatewayConfig {
        request_timeout: Duration::from_secs(1),
        max_retries: 1,
        ..GatewayConfig::default()
    };
    let response = app_with(
        ScriptedBackend::hanging(Duration::from_secs(30)),
        config,
        CallerContext::anonymous(),
    )
    .oneshot(post(json!({"messages": [{"role": "user", "content": "hi"}]})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json_body(response).await["error"], "ProviderTimeoutError");
}

#[tokio::test]
async fn test_preflight() {
    let response = app(hello_backend())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/search")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-max-age"], "86400");
}

#[tokio::test]
async fn test_models_lists_offered_models() {
    let response = app(hello_backend())
        .oneshot(
            Request::builder()
                .uri("/api/models")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let ids: Vec<_> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["value"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["scira-default", "scira-grok-4"]);
    assert_eq!(body["models"][1]["pro"], true);
    assert_eq!(body["models"][1]["requiresAuth"], true);
}
