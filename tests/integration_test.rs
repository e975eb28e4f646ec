mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use stream_gateway::controller::{GenerationController, GenerationHandle, GenerationRequest};
use stream_gateway::middleware::{ChunkPolicy, Middleware, TagConfig};
use stream_gateway::registry::BackendHandle;
use stream_gateway::resilience::{PoolConfig, ResilientClient, RetryPolicy};
use stream_gateway::tools::{builtin_tools, ToolSet};
use stream_gateway::{
    BackendEvent, BackendFinish, ConversationItem, EventPayload, FinishReason, GenerationConfig,
    GenerationOutcome, StreamEvent, ToolCall, Usage,
};
use support::{registry_with, text, CountingTool, NapTool, ScriptedBackend, Step};

fn controller_for(model: &str, handle: BackendHandle) -> GenerationController {
    GenerationController::new(Arc::new(registry_with(model, handle)))
}

fn done(reason: BackendFinish, usage: Usage) -> Step {
    Step::Event(BackendEvent::Done {
        finish_reason: reason,
        usage,
    })
}

fn tool_call(id: &str, name: &str, input: serde_json::Value) -> Step {
    Step::Event(BackendEvent::ToolCall {
        call: ToolCall::new(id, name, input),
    })
}

async fn drain(mut handle: GenerationHandle) -> (Vec<StreamEvent>, GenerationOutcome) {
    let mut events = Vec::new();
    while let Some(event) = handle.events().next().await {
        events.push(event);
    }
    (events, handle.outcome().await)
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.payload.kind()).collect()
}

fn assert_well_formed(events: &[StreamEvent]) {
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(event.seq, expected as u64, "sequence numbers must be contiguous");
    }
    let terminals = events.iter().filter(|e| e.payload.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event");
    assert!(events.last().unwrap().payload.is_terminal());
}

#[tokio::test]
async fn test_default_model_stop() {
    let backend = ScriptedBackend::new(vec![vec![
        text("Hello"),
        text(", world"),
        done(BackendFinish::Stop, Usage::new(12, 4)),
    ]]);
    let controller = controller_for("scira-default", BackendHandle::new(backend.clone(), "gemini-2.5-flash"));

    let handle = controller
        .start(GenerationRequest::new("Say hello", "scira-default"))
        .unwrap();
    let (events, outcome) = drain(handle).await;

    assert_eq!(kinds(&events), vec!["text-delta", "text-delta", "finish"]);
    assert_well_formed(&events);
    match &events[2].payload {
        EventPayload::Finish {
            finish_reason,
            usage,
            model,
            ..
        } => {
            assert_eq!(*finish_reason, FinishReason::Stop);
            assert_eq!(*usage, Usage::new(12, 4));
            assert_eq!(model, "scira-default");
        }
        other => panic!("expected finish, got {other:?}"),
    }
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.usage.total_tokens, Some(16));

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "gemini-2.5-flash");
    assert_eq!(requests[0].max_output_tokens, Some(8000));
}

#[tokio::test]
async fn test_datetime_tool_round_trip() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call("call_1", "datetime", json!({"timezone": "UTC"})),
            done(BackendFinish::ToolCalls, Usage::new(20, 5)),
        ],
        vec![
            text("It is "),
            text("now."),
            done(BackendFinish::Stop, Usage::new(30, 3)),
        ],
    ]);
    let controller = controller_for("scira-default", BackendHandle::new(backend.clone(), "upstream"));
    let client = ResilientClient::new(&PoolConfig::default(), RetryPolicy::default()).unwrap();
    let tools = builtin_tools(client).unwrap().select(&["datetime"]).unwrap();

    let handle = controller
        .start(GenerationRequest::new("What time is it?", "scira-default").with_tools(tools))
        .unwrap();
    let (events, outcome) = drain(handle).await;

    assert_eq!(
        kinds(&events),
        vec!["tool-call-started", "tool-result", "text-delta", "text-delta", "finish"]
    );
    assert_well_formed(&events);

    match &events[1].payload {
        EventPayload::ToolResult(data) => {
            assert_eq!(data.call_id, "call_1");
            let value = serde_json::to_value(&data.outcome).unwrap();
            assert_eq!(value["result"]["timezone"], "+00:00");
            assert!(value["result"]["iso"].is_string());
        }
        other => panic!("expected tool-result, got {other:?}"),
    }
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.usage, Usage::new(50, 8));

    // The second round sees the call and its output.
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    let history = &requests[1].messages;
    assert!(matches!(&history[history.len() - 2], ConversationItem::ToolCall(call) if call.call_id == "call_1"));
    assert_eq!(history.last().unwrap().call_id(), Some("call_1"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_retry_budget() {
    let backend = ScriptedBackend::hanging(Duration::from_secs(60));
    let controller = controller_for("slow", BackendHandle::new(backend.clone(), "upstream"));
    let retry = RetryPolicy::default()
        .with_max_attempts(3)
        .with_attempt_timeout(Duration::from_secs(1))
        .with_initial_backoff(Duration::from_millis(10))
        .with_jitter(false);
    let config = GenerationConfig::default()
        .with_retry(retry)
        .with_deadline(Duration::from_secs(30));

    let handle = controller
        .start(GenerationRequest::new("hi", "slow").with_config(config))
        .unwrap();
    let (events, outcome) = drain(handle).await;

    assert_eq!(backend.calls(), 3);
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        EventPayload::Error { kind, .. } => assert_eq!(kind, "ProviderTimeoutError"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(outcome.finish_reason, FinishReason::Error);
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_bounds_retries() {
    let backend = ScriptedBackend::hanging(Duration::from_secs(60));
    let controller = controller_for("slow", BackendHandle::new(backend.clone(), "upstream"));
    let config = GenerationConfig::default()
        .with_retry(RetryPolicy::default().with_max_attempts(3))
        .with_deadline(Duration::from_secs(2));

    let handle = controller
        .start(GenerationRequest::new("hi", "slow").with_config(config))
        .unwrap();
    let (events, _) = drain(handle).await;

    assert!(backend.calls() <= 3);
    assert!(events.iter().all(|e| e.payload.kind() != "text-delta"));
    assert_eq!(kinds(&events), vec!["error"]);
}

#[tokio::test]
async fn test_abort_after_two_text_deltas() {
    let mut steps = Vec::new();
    for i in 0..50 {
        steps.push(text(&format!("chunk{i} ")));
        steps.push(Step::Sleep(Duration::from_millis(5)));
    }
    steps.push(done(BackendFinish::Stop, Usage::default()));
    let backend = ScriptedBackend::new(vec![steps]);
    let controller = controller_for("m", BackendHandle::new(backend, "upstream"));

    let mut handle = controller.start(GenerationRequest::new("hi", "m")).unwrap();
    let mut seen = Vec::new();
    while let Some(event) = handle.events().next().await {
        seen.push(event);
        if seen.len() == 2 {
            handle.abort();
            break;
        }
    }
    assert!(handle.events().next().await.is_none());
    let outcome = handle.outcome().await;

    assert_eq!(kinds(&seen), vec!["text-delta", "text-delta"]);
    assert_eq!(outcome.finish_reason, FinishReason::Aborted);
}

#[tokio::test]
async fn test_duplicate_call_ids_dispatch_once() {
    let counter = Arc::new(CountingTool::default());
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call("dup", "count", json!({})),
            tool_call("dup", "count", json!({})),
            tool_call("other", "count", json!({})),
            done(BackendFinish::ToolCalls, Usage::default()),
        ],
        vec![text("done"), done(BackendFinish::Stop, Usage::default())],
    ]);
    let controller = controller_for("m", BackendHandle::new(backend, "upstream"));
    let tools = ToolSet::new().with(counter.clone()).unwrap();

    let handle = controller
        .start(GenerationRequest::new("count", "m").with_tools(tools))
        .unwrap();
    let (events, _) = drain(handle).await;

    assert_eq!(counter.invocations.load(Ordering::SeqCst), 2);
    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolCallStarted { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["dup", "other"]);

    // Results arrive in issue order.
    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolResult(data) => Some(data.call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(results, vec!["dup", "other"]);
    assert_well_formed(&events);
}

#[tokio::test(start_paused = true)]
async fn test_tools_run_concurrently_and_report_in_issue_order() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call("slow", "nap", json!({"ms": 300})),
            tool_call("fast", "nap", json!({"ms": 10})),
            done(BackendFinish::ToolCalls, Usage::default()),
        ],
        vec![text("rested"), done(BackendFinish::Stop, Usage::default())],
    ]);
    let controller = controller_for("m", BackendHandle::new(backend, "upstream"));
    let nap = Arc::new(NapTool::default());
    let tools = ToolSet::new().with(nap.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let handle = controller
        .start(GenerationRequest::new("nap", "m").with_tools(tools))
        .unwrap();
    let (events, outcome) = drain(handle).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(*nap.finished.lock().unwrap(), vec!["fast", "slow"]);

    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolResult(data) => Some(data.call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(results, vec!["slow", "fast"]);

    // Bounded by the slowest call, not the sum of both.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(310), "elapsed {elapsed:?}");
    assert_eq!(
        kinds(&events),
        vec!["tool-call-started", "tool-call-started", "tool-result", "tool-result", "text-delta", "finish"]
    );
    assert_well_formed(&events);
}

#[tokio::test]
async fn test_invalid_tool_input_reported_inline() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call("c1", "datetime", json!({"timezone": 42})),
            done(BackendFinish::ToolCalls, Usage::default()),
        ],
        vec![text("ok"), done(BackendFinish::Stop, Usage::default())],
    ]);
    let controller = controller_for("m", BackendHandle::new(backend, "upstream"));
    let client = ResilientClient::new(&PoolConfig::default(), RetryPolicy::default()).unwrap();
    let tools = builtin_tools(client).unwrap();

    let handle = controller
        .start(GenerationRequest::new("time?", "m").with_tools(tools))
        .unwrap();
    let (events, outcome) = drain(handle).await;

    let value = serde_json::to_value(&events[1].payload).unwrap();
    assert_eq!(value["type"], "tool-result");
    assert_eq!(value["data"]["error"]["kind"], "ToolInputValidationError");
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_reasoning_extraction_through_binding() {
    let backend = ScriptedBackend::new(vec![vec![
        text("<th"),
        text("ink>hello</think>world"),
        done(BackendFinish::Stop, Usage::default()),
    ]]);
    let handle = BackendHandle::new(backend, "qwen/qwen3-32b")
        .with_middleware(Middleware::reasoning(TagConfig::think()));
    let controller = controller_for("scira-qwen-32b", handle);

    let handle = controller
        .start(GenerationRequest::new("think", "scira-qwen-32b"))
        .unwrap();
    let (events, _) = drain(handle).await;

    let mut reasoning = String::new();
    let mut answer = String::new();
    for event in &events {
        match &event.payload {
            EventPayload::ReasoningDelta { text } => {
                assert!(answer.is_empty(), "reasoning must precede text");
                reasoning.push_str(text);
            }
            EventPayload::TextDelta { text } => answer.push_str(text),
            _ => {}
        }
    }
    assert_eq!(reasoning, "hello");
    assert_eq!(answer, "world");
    assert_well_formed(&events);
}

#[tokio::test]
async fn test_simulated_streaming_of_buffered_backend() {
    let backend = ScriptedBackend::new(vec![vec![
        Step::Event(BackendEvent::Buffered {
            text: "Hello world".to_string(),
            reasoning: None,
        }),
        done(BackendFinish::Stop, Usage::default()),
    ]]);
    let handle = BackendHandle::new(backend, "upstream")
        .with_middleware(Middleware::simulated(ChunkPolicy::FixedSize(5)));
    let controller = controller_for("scira-name", handle);

    let handle = controller
        .start(GenerationRequest::new("title", "scira-name"))
        .unwrap();
    let (events, _) = drain(handle).await;

    let deltas: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hello", " worl", "d"]);
}

#[tokio::test]
async fn test_mid_stream_failure_is_not_retried() {
    let backend = ScriptedBackend::new(vec![
        vec![text("partial"), Step::Fail("connection reset")],
        vec![text("second attempt"), done(BackendFinish::Stop, Usage::default())],
    ]);
    let controller = controller_for("m", BackendHandle::new(backend.clone(), "upstream"));

    let handle = controller.start(GenerationRequest::new("hi", "m")).unwrap();
    let (events, outcome) = drain(handle).await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(kinds(&events), vec!["text-delta", "error"]);
    assert_eq!(outcome.finish_reason, FinishReason::Error);
}
