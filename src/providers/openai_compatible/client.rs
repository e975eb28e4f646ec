use std::collections::BTreeMap;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;

use super::types::{
    ApiErrorBody, ChatChunk, ChatCompletion, ChatCompletionRequest, ChatFunction,
    ChatFunctionCall, ChatMessage, ChatTool, ChatToolCall, StreamOptions,
};
use crate::provider::LanguageModel;
use crate::resilience::{HostPermit, ResilientClient};
use crate::sse_stream::sse_events;
use crate::types::{BackendEvent, BackendFinish, ConversationItem, Role, ToolCall, Usage};
use crate::{BackendRequest, Error, Response};

/// Whether the backend is asked for incremental output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    Streaming,
    /// `stream: false`; the whole answer arrives as one buffered event.
    Buffered,
}

/// Backend for any vendor that speaks the OpenAI `/chat/completions`
/// protocol (OpenAI, Groq, xAI, Mistral, the Gemini and Anthropic
/// compatibility endpoints, the Hugging Face router).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    client: ResilientClient,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    delivery: Delivery,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        client: ResilientClient,
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            delivery: Delivery::Streaming,
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn convert_request(&self, request: &BackendRequest) -> ChatCompletionRequest {
        let streaming = self.delivery == Delivery::Streaming;
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: convert_messages(request.system.as_deref(), &request.messages),
            max_tokens: request.max_output_tokens,
            tools: request
                .tools
                .iter()
                .map(|tool| ChatTool {
                    r#type: "function".to_string(),
                    function: ChatFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
            tool_choice: (!request.tools.is_empty())
                .then(|| request.tool_choice.as_wire().to_string()),
            stream: streaming,
            stream_options: streaming.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        let message = format!("{status}: {message}");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::auth(&self.provider, message),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                Error::provider(&self.provider, message)
            }
            s if s.is_server_error() => Error::provider(&self.provider, message),
            _ => Error::provider_fatal(&self.provider, message),
        })
    }
}

/// Map conversation items to chat messages. An assistant message directly
/// followed by tool calls becomes a single message carrying those calls.
fn convert_messages(system: Option<&str>, items: &[ConversationItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(items.len() + 1);
    if let Some(system) = system {
        messages.push(ChatMessage::text("system", system));
    }

    for item in items {
        match item {
            ConversationItem::Message(msg) => {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                messages.push(ChatMessage::text(role, msg.content.clone()));
            }
            ConversationItem::ToolCall(call) => {
                let wire = ChatToolCall {
                    id: call.call_id.clone(),
                    r#type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                };
                match messages.last_mut() {
                    Some(last) if last.role == "assistant" && last.tool_call_id.is_none() => {
                        last.tool_calls.push(wire)
                    }
                    _ => messages.push(ChatMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: vec![wire],
                        tool_call_id: None,
                    }),
                }
            }
            ConversationItem::ToolOutput { call_id, output } => {
                let content = match output {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call_id.clone()),
                });
            }
        }
    }
    messages
}

/// Arguments as parsed JSON; unparseable text is kept as a string so input
/// validation rejects it.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds streamed chunks into backend events.
#[derive(Debug, Default)]
struct ChunkState {
    calls: BTreeMap<u32, PartialCall>,
    finish: Option<BackendFinish>,
    usage: Usage,
}

impl ChunkState {
    fn process(&mut self, chunk: ChatChunk) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }

        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning.or(delta.reasoning_content) {
                if !reasoning.is_empty() {
                    events.push(BackendEvent::ReasoningDelta { text: reasoning });
                }
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    events.push(BackendEvent::TextDelta { text: content });
                }
            }
            for fragment in delta.tool_calls {
                let partial = self.calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    partial.id = Some(id);
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(BackendFinish::from_wire(&reason));
                events.extend(self.drain_calls());
            }
        }
        events
    }

    fn drain_calls(&mut self) -> impl Iterator<Item = BackendEvent> {
        std::mem::take(&mut self.calls).into_values().map(|partial| {
            BackendEvent::ToolCall {
                call: ToolCall::new(
                    partial.id.unwrap_or_else(fresh_call_id),
                    partial.name,
                    parse_arguments(&partial.arguments),
                ),
            }
        })
    }

    /// The closing events, or an error if the upstream never finished.
    fn finish(&mut self, provider: &str) -> Result<Vec<BackendEvent>, Error> {
        let Some(finish_reason) = self.finish else {
            return Err(Error::streaming(format!(
                "{provider} closed the stream before finishing"
            )));
        };
        let mut events: Vec<_> = self.drain_calls().collect();
        events.push(BackendEvent::Done {
            finish_reason,
            usage: self.usage,
        });
        Ok(events)
    }
}

fn completion_events(completion: ChatCompletion) -> Vec<BackendEvent> {
    let mut events = Vec::new();
    let mut finish_reason = BackendFinish::Stop;

    if let Some(choice) = completion.choices.into_iter().next() {
        let message = choice.message;
        events.push(BackendEvent::Buffered {
            text: message.content.unwrap_or_default(),
            reasoning: message.reasoning.or(message.reasoning_content),
        });
        for call in message.tool_calls {
            events.push(BackendEvent::ToolCall {
                call: ToolCall::new(call.id, call.function.name, parse_arguments(&call.function.arguments)),
            });
        }
        if let Some(reason) = choice.finish_reason {
            finish_reason = BackendFinish::from_wire(&reason);
        }
    }

    events.push(BackendEvent::Done {
        finish_reason,
        usage: completion.usage.map(Usage::from).unwrap_or_default(),
    });
    events
}

fn stream_events(
    provider: String,
    response: reqwest::Response,
    permit: HostPermit,
) -> impl futures_util::Stream<Item = Result<BackendEvent, Error>> + Send {
    async_stream::stream! {
        let _permit = permit;
        let frames = sse_events(response.bytes_stream());
        futures_util::pin_mut!(frames);
        let mut state = ChunkState::default();

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if frame.is_done() {
                break;
            }
            let chunk = match serde_json::from_str::<ChatChunk>(&frame.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(provider = %provider, error = %e, "skipping unparseable chunk");
                    continue;
                }
            };
            for event in state.process(chunk) {
                yield Ok(event);
            }
        }

        match state.finish(&provider) {
            Ok(events) => {
                for event in events {
                    yield Ok(event);
                }
            }
            Err(e) => yield Err(e),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatibleBackend {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, request: &BackendRequest) -> Result<Response, Error> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::auth(&self.provider, "no API key configured"))?;

        let body = self.convert_request(request);
        let builder = self
            .client
            .http()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body);

        tracing::debug!(
            provider = %self.provider,
            model = %request.model,
            streaming = body.stream,
            tools = body.tools.len(),
            "sending chat completion request"
        );
        let (response, permit) = self.client.send(builder).await?;
        let response = self.check_status(response).await?;

        match self.delivery {
            Delivery::Streaming => Ok(Response::from_stream(stream_events(
                self.provider.clone(),
                response,
                permit,
            ))),
            Delivery::Buffered => {
                let completion: ChatCompletion = response.json().await?;
                drop(permit);
                Ok(Response::from_events(completion_events(completion)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{PoolConfig, RetryPolicy};
    use crate::types::{ToolChoice, ToolSpec};
    use serde_json::json;

    fn backend() -> OpenAiCompatibleBackend {
        let client = ResilientClient::new(&PoolConfig::default(), RetryPolicy::default()).unwrap();
        OpenAiCompatibleBackend::new(client, "groq", "https://api.groq.com/openai/v1/", Some("k".into()))
    }

    #[test]
    fn request_conversion() {
        let request = BackendRequest {
            model: "qwen/qwen3-32b".to_string(),
            system: Some("be brief".to_string()),
            messages: vec![
                ConversationItem::user("time?"),
                ConversationItem::assistant("checking"),
                ConversationItem::tool_call(ToolCall::new("c1", "datetime", json!({}))),
                ConversationItem::tool_output("c1", json!({"iso": "x"})),
            ],
            max_output_tokens: Some(16000),
            tools: vec![ToolSpec {
                name: "datetime".to_string(),
                description: "now".to_string(),
                parameters: json!({"type": "object"}),
            }],
            tool_choice: ToolChoice::Auto,
        };

        let wire = backend().convert_request(&request);
        assert_eq!(wire.messages.len(), 4);
        assert_eq!(wire.messages[0].role, "system");
        assert_eq!(wire.messages[2].content.as_deref(), Some("checking"));
        assert_eq!(wire.messages[2].tool_calls[0].id, "c1");
        assert_eq!(wire.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire.tool_choice.as_deref(), Some("auto"));
        assert!(wire.stream);

        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["stream_options"]["include_usage"], true);
        assert_eq!(value["max_tokens"], 16000);
    }

    #[test]
    fn tool_fragments_join_by_index() {
        let mut state = ChunkState::default();
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1", "function": {"name": "datetime", "arguments": "{\"time"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "zone\": \"UTC\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}}),
        ];

        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(state.process(serde_json::from_value(chunk).unwrap()));
        }
        events.extend(state.finish("groq").unwrap());

        assert_eq!(
            events,
            vec![
                BackendEvent::ToolCall {
                    call: ToolCall::new("c1", "datetime", json!({"timezone": "UTC"})),
                },
                BackendEvent::Done {
                    finish_reason: BackendFinish::ToolCalls,
                    usage: Usage::new(5, 2),
                },
            ]
        );
    }

    #[test]
    fn reasoning_fields_map_to_reasoning_deltas() {
        let mut state = ChunkState::default();
        let chunk = json!({"choices": [{"delta": {"reasoning_content": "hmm", "content": "4"}}]});
        let events = state.process(serde_json::from_value(chunk).unwrap());
        assert_eq!(events, vec![BackendEvent::reasoning("hmm"), BackendEvent::text("4")]);
    }

    #[test]
    fn unfinished_stream_is_an_error() {
        let mut state = ChunkState::default();
        assert!(state.finish("groq").is_err());
    }

    #[test]
    fn bad_arguments_stay_as_text() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{oops"), json!("{oops"));
    }

    #[test]
    fn buffered_completion_events() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"content": "Hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1}
        }))
        .unwrap();
        let events = completion_events(completion);
        assert_eq!(
            events[0],
            BackendEvent::Buffered {
                text: "Hello".to_string(),
                reasoning: None
            }
        );
        assert_eq!(
            events[1],
            BackendEvent::Done {
                finish_reason: BackendFinish::Stop,
                usage: Usage::new(1, 1)
            }
        );
    }
}
