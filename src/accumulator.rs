//! Delta accumulation for one backend round.

use crate::response::CompleteTurn;
use crate::types::{BackendEvent, ToolCall};

/// Folds a round's backend events into a [`CompleteTurn`].
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    turn: CompleteTurn,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_event(&mut self, event: &BackendEvent) {
        match event {
            BackendEvent::TextDelta { text } => self.turn.text.push_str(text),
            BackendEvent::ReasoningDelta { text } => self.turn.reasoning.push_str(text),
            BackendEvent::Buffered { text, reasoning } => {
                if let Some(reasoning) = reasoning {
                    self.turn.reasoning.push_str(reasoning);
                }
                self.turn.text.push_str(text);
            }
            BackendEvent::ToolCall { call } => self.push_call(call.clone()),
            BackendEvent::Done {
                finish_reason,
                usage,
            } => {
                self.turn.finish_reason = Some(*finish_reason);
                self.turn.usage = self.turn.usage.add(*usage);
            }
        }
    }

    /// Record a tool call; a repeated call id keeps the first emission.
    pub fn push_call(&mut self, call: ToolCall) {
        if self
            .turn
            .tool_calls
            .iter()
            .all(|existing| existing.call_id != call.call_id)
        {
            self.turn.tool_calls.push(call);
        }
    }

    pub fn current_text(&self) -> &str {
        &self.turn.text
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.turn.tool_calls
    }

    pub fn finalize(self) -> CompleteTurn {
        self.turn
    }
}
