//! Scripted in-process backends shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_gateway::registry::{BackendHandle, Category, ModelDescriptor, ProviderRegistry};
use stream_gateway::tools::{Tool, ToolContext, ToolError};
use stream_gateway::{BackendEvent, BackendRequest, Error, LanguageModel, Response};

#[derive(Debug, Clone)]
pub enum Step {
    Event(BackendEvent),
    Sleep(Duration),
    Fail(&'static str),
}

pub fn text(t: &str) -> Step {
    Step::Event(BackendEvent::text(t))
}

/// Backend that replays one scripted round per `generate` call.
pub struct ScriptedBackend {
    rounds: Mutex<VecDeque<Vec<Step>>>,
    open_delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new(rounds: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            open_delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A backend whose every call hangs for `delay` before responding.
    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(VecDeque::new()),
            open_delay: Some(delay),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedBackend {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &BackendRequest) -> Result<Response, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let steps = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Response::from_stream(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Sleep(delay) => tokio::time::sleep(delay).await,
                    Step::Fail(message) => {
                        yield Err(Error::provider_fatal("scripted", message));
                        return;
                    }
                }
            }
        }))
    }
}

pub fn registry_with(model: &str, handle: BackendHandle) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register(
            ModelDescriptor::new(model, "Test model", Category::Free).free_unlimited(),
            handle,
        )
        .unwrap();
    registry
}

/// Tool that counts its invocations.
#[derive(Default)]
pub struct CountingTool {
    pub invocations: AtomicUsize,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "count"
    }

    fn description(&self) -> &str {
        "Counts how often it is called"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn call(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "count": n }))
    }
}

/// Tool that sleeps for `ms` milliseconds and records when each call finishes.
#[derive(Default)]
pub struct NapTool {
    pub finished: Mutex<Vec<String>>,
}

#[async_trait]
impl Tool for NapTool {
    fn name(&self) -> &str {
        "nap"
    }

    fn description(&self) -> &str {
        "Sleeps for the given number of milliseconds"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"ms": {"type": "integer", "minimum": 0}},
            "required": ["ms"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ms = input["ms"].as_u64().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.finished.lock().unwrap().push(ctx.call_id.clone());
        Ok(json!({ "slept_ms": ms }))
    }
}
