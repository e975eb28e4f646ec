//! Event vocabularies: what backends emit, and what the client receives.

use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolOutcome;
use crate::types::{BackendFinish, ToolCall, Usage};

/// Events a backend (after middleware) emits for one round of generation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A chunk of visible text.
    TextDelta { text: String },
    /// A chunk of reasoning text.
    ReasoningDelta { text: String },
    /// The complete output of a backend without incremental delivery.
    Buffered {
        text: String,
        reasoning: Option<String>,
    },
    /// A complete tool call with parsed arguments.
    ToolCall { call: ToolCall },
    /// The round has finished.
    Done {
        finish_reason: BackendFinish,
        usage: Usage,
    },
}

impl BackendEvent {
    pub fn text(text: impl Into<String>) -> Self {
        BackendEvent::TextDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        BackendEvent::ReasoningDelta { text: text.into() }
    }

    pub fn done(finish_reason: BackendFinish) -> Self {
        BackendEvent::Done {
            finish_reason,
            usage: Usage::default(),
        }
    }
}

/// Terminal reason reported in the `finish` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolLimit,
    Error,
    Aborted,
}

/// Payload of one client-facing event.
///
/// Serializes as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EventPayload {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult(ToolResultData),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        model: String,
        completion_time_ms: u64,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultData {
    pub call_id: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl EventPayload {
    pub fn tool_result(call_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        EventPayload::ToolResult(ToolResultData {
            call_id: call_id.into(),
            outcome,
        })
    }

    pub fn error(error: &crate::Error) -> Self {
        EventPayload::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    /// `finish` and `error` are the only events allowed to end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::Finish { .. } | EventPayload::Error { .. })
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::TextDelta { .. } => "text-delta",
            EventPayload::ReasoningDelta { .. } => "reasoning-delta",
            EventPayload::ToolCallStarted { .. } => "tool-call-started",
            EventPayload::ToolResult(_) => "tool-result",
            EventPayload::Finish { .. } => "finish",
            EventPayload::Error { .. } => "error",
        }
    }
}

/// A client-facing event with its per-request sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub seq: u64,
    pub payload: EventPayload,
}
