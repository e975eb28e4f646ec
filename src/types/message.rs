use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item of a conversation: a role-tagged message, a tool call the
/// assistant issued, or the output that answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversationItem {
    /// A message with role and content
    Message(Message),
    /// A tool call issued by the assistant
    ToolCall(ToolCall),
    /// Output returned for a tool call
    ToolOutput { call_id: String, output: Value },
}

/// A message with role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl ConversationItem {
    pub fn system(content: impl Into<String>) -> Self {
        ConversationItem::Message(Message::system(content))
    }

    pub fn user(content: impl Into<String>) -> Self {
        ConversationItem::Message(Message::user(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ConversationItem::Message(Message::assistant(content))
    }

    pub fn tool_call(call: ToolCall) -> Self {
        ConversationItem::ToolCall(call)
    }

    pub fn tool_output(call_id: impl Into<String>, output: Value) -> Self {
        ConversationItem::ToolOutput {
            call_id: call_id.into(),
            output,
        }
    }

    /// Get the role of this item (if it's a message).
    pub fn role(&self) -> Option<Role> {
        match self {
            ConversationItem::Message(msg) => Some(msg.role),
            _ => None,
        }
    }

    /// The call id this item refers to, for tool calls and tool outputs.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            ConversationItem::ToolCall(call) => Some(&call.call_id),
            ConversationItem::ToolOutput { call_id, .. } => Some(call_id),
            ConversationItem::Message(_) => None,
        }
    }
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Get the text content of this message (if any).
    pub fn content(&self) -> Option<&str> {
        if self.content.is_empty() {
            None
        } else {
            Some(&self.content)
        }
    }
}

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Tool declaration as sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

/// A tool call emitted by a backend.
///
/// `arguments` holds the parsed JSON input. Backends that deliver
/// unparseable argument text pass it through as a JSON string so the
/// dispatcher rejects it during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Reason a backend ended one round of generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFinish {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl BackendFinish {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" => BackendFinish::Length,
            "tool_calls" | "function_call" | "tool_use" => BackendFinish::ToolCalls,
            "content_filter" => BackendFinish::ContentFilter,
            _ => BackendFinish::Stop,
        }
    }
}
