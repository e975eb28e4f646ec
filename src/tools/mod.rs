//! Tools the backend may call during generation.
//!
//! A tool failure is scoped to its call id: it is reported inline as a
//! `tool-result` carrying a [`ToolError`], and generation continues. Only
//! tools configured as fatal escalate to a request-level failure.

mod builtins;
mod dispatcher;
mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resilience::Deadline;

pub use builtins::{builtin_tools, parse_utc_offset, DateTimeTool, GreetingTool, RetrieveTool};
pub use dispatcher::{ToolDispatcher, ToolFuture};
pub use registry::ToolSet;

/// What a tool touches when it runs. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffect {
    PureRead,
    ExternalRead,
    ExternalWrite,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::PureRead => "pure-read",
            SideEffect::ExternalRead => "external-read",
            SideEffect::ExternalWrite => "external-write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolErrorKind {
    #[serde(rename = "ToolInputValidationError")]
    InputValidation,
    #[serde(rename = "ToolExecutionError")]
    Execution,
}

/// Failure of a single tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InputValidation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    /// The request-level error this becomes when the tool is fatal.
    pub fn into_request_error(self, tool: &str) -> crate::Error {
        match self.kind {
            ToolErrorKind::InputValidation => crate::Error::ToolInputValidation {
                tool: tool.to_string(),
                message: self.message,
            },
            ToolErrorKind::Execution => crate::Error::ToolExecution {
                tool: tool.to_string(),
                message: self.message,
            },
        }
    }
}

/// Result of one tool call as delivered to the client and the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Result(Value),
    Error(ToolError),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    /// The value fed back to the backend as the call's output.
    pub fn to_feedback(&self) -> Value {
        match self {
            ToolOutcome::Result(value) => value.clone(),
            ToolOutcome::Error(error) => json!({ "error": error }),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => ToolOutcome::Result(value),
            Err(error) => ToolOutcome::Error(error),
        }
    }
}

/// Request-scoped context handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub timezone: String,
    pub search_provider: Option<String>,
    pub deadline: Deadline,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema the call input must satisfy.
    fn input_schema(&self) -> Value;

    fn side_effect(&self) -> SideEffect {
        SideEffect::PureRead
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}
