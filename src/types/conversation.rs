use serde_json::Value;

use super::message::{ConversationItem, ToolCall};

/// An ordered conversation, built up across backend rounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    items: Vec<ConversationItem>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Create a conversation with a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            items: vec![ConversationItem::user(content)],
        }
    }

    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.items.push(ConversationItem::system(content));
        self
    }

    pub fn with_user(mut self, content: impl Into<String>) -> Self {
        self.items.push(ConversationItem::user(content));
        self
    }

    pub fn with_assistant(mut self, content: impl Into<String>) -> Self {
        self.items.push(ConversationItem::assistant(content));
        self
    }

    pub fn with_item(mut self, item: ConversationItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn push(&mut self, item: ConversationItem) {
        self.items.push(item);
    }

    /// Append a finished assistant turn, keeping text before its tool calls.
    pub fn push_turn(&mut self, turn: &crate::response::CompleteTurn) {
        self.items.extend(turn.to_items());
    }

    /// Append the output for a tool call.
    pub fn push_tool_output(&mut self, call: &ToolCall, output: Value) {
        self.items
            .push(ConversationItem::tool_output(call.call_id.clone(), output));
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<&str> for Conversation {
    fn from(s: &str) -> Self {
        Conversation::user(s)
    }
}

impl From<String> for Conversation {
    fn from(s: String) -> Self {
        Conversation::user(s)
    }
}

impl From<Vec<ConversationItem>> for Conversation {
    fn from(items: Vec<ConversationItem>) -> Self {
        Conversation { items }
    }
}
