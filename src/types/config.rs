use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::message::{ConversationItem, ToolSpec};
use crate::resilience::RetryPolicy;

/// Default whole-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of backend rounds that may end in tool calls.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 5;

/// Token usage information. Fields stay `None` when no backend round
/// reported them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: Some(input_tokens + output_tokens),
        }
    }

    /// Sum two usage records, keeping `None` only where both sides are `None`.
    pub fn add(self, other: Usage) -> Usage {
        fn sum(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage {
            input_tokens: sum(self.input_tokens, other.input_tokens),
            output_tokens: sum(self.output_tokens, other.output_tokens),
            total_tokens: sum(self.total_tokens, other.total_tokens),
        }
    }
}

/// Whether and how the backend may call tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl ToolChoice {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        }
    }
}

/// Per-request generation configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub tool_choice: ToolChoice,
    pub retry: RetryPolicy,
    /// Whole-request time budget, covering every retry and tool call.
    pub deadline: Duration,
    pub system_prompt: Option<String>,
    pub max_tool_rounds: u32,
    /// Tools whose failure fails the whole request instead of being
    /// reported inline.
    pub fatal_tools: HashSet<String>,
    pub timezone: String,
    pub search_provider: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            tool_choice: ToolChoice::Auto,
            retry: RetryPolicy::default(),
            deadline: DEFAULT_REQUEST_TIMEOUT,
            system_prompt: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            fatal_tools: HashSet::new(),
            timezone: "UTC".to_string(),
            search_provider: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_fatal_tool(mut self, name: impl Into<String>) -> Self {
        self.fatal_tools.insert(name.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

/// What a backend receives for one round of generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Upstream model name, e.g. `gemini-2.5-flash`.
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ConversationItem>,
    pub max_output_tokens: Option<u32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}
