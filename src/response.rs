//! Backend responses: a stream of [`BackendEvent`]s and its buffered form.

use crate::types::{BackendEvent, BackendFinish, ConversationItem, ToolCall, Usage};
use crate::Error;
use futures_util::stream::Stream;
use std::pin::Pin;

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, Error>> + Send>>;

/// One finished backend round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteTurn {
    pub text: String,
    pub reasoning: String,
    /// Tool calls in the order the backend issued them.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<BackendFinish>,
    pub usage: Usage,
}

impl CompleteTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Conversation items for this turn: the assistant text (if any)
    /// followed by each tool call.
    pub fn to_items(&self) -> Vec<ConversationItem> {
        let mut items = Vec::with_capacity(self.tool_calls.len() + 1);
        if !self.text.is_empty() {
            items.push(ConversationItem::assistant(self.text.clone()));
        }
        items.extend(self.tool_calls.iter().cloned().map(ConversationItem::ToolCall));
        items
    }
}

/// Response from a backend round. All responses are streams; a backend
/// without incremental delivery emits a single [`BackendEvent::Buffered`].
pub struct Response {
    stream: BackendStream,
}

impl Response {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<BackendEvent, Error>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// Build a response from already-known events.
    pub fn from_events(events: Vec<BackendEvent>) -> Self {
        Self::from_stream(futures_util::stream::iter(events.into_iter().map(Ok)))
    }

    /// Replace the underlying stream, e.g. with a middleware-wrapped one.
    pub fn map_stream(self, f: impl FnOnce(BackendStream) -> BackendStream) -> Self {
        Self {
            stream: f(self.stream),
        }
    }

    pub fn stream(self) -> BackendStream {
        self.stream
    }

    /// Buffer the entire round by consuming the stream.
    pub async fn buffer(self) -> Result<CompleteTurn, Error> {
        use futures_util::StreamExt;

        let mut stream = self.stream;
        let mut accumulator = crate::accumulator::TurnAccumulator::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            let done = matches!(event, BackendEvent::Done { .. });
            accumulator.process_event(&event);
            if done {
                break;
            }
        }
        Ok(accumulator.finalize())
    }

    /// Get just the text content.
    pub async fn text(self) -> Result<String, Error> {
        Ok(self.buffer().await?.text)
    }
}
