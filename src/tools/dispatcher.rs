use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::Value;

use super::{ToolContext, ToolError, ToolOutcome, ToolSet};
use crate::types::ToolCall;

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// Dispatches the tool calls of one request.
///
/// Each call id is dispatched at most once; a repeated emission for an id
/// that was already seen is dropped.
#[derive(Debug)]
pub struct ToolDispatcher {
    tools: ToolSet,
    seen: HashSet<String>,
}

impl ToolDispatcher {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            seen: HashSet::new(),
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn has_seen(&self, call_id: &str) -> bool {
        self.seen.contains(call_id)
    }

    /// Validate `call` and return the future that runs it, or `None` if
    /// the call id was already dispatched.
    ///
    /// Input problems resolve immediately to a validation error without
    /// invoking the handler. The returned future honours the context's
    /// deadline and cancellation token.
    pub fn begin(&mut self, call: &ToolCall, ctx: ToolContext) -> Option<ToolFuture> {
        if !self.seen.insert(call.call_id.clone()) {
            tracing::debug!(call_id = %call.call_id, tool = %call.name, "duplicate tool call ignored");
            return None;
        }

        let Some(declared) = self.tools.get(&call.name) else {
            let available = self.tools.names().join(", ");
            return Some(ready(ToolOutcome::Error(ToolError::invalid_input(format!(
                "tool '{}' not found (available: {available})",
                call.name
            )))));
        };

        if let Err(error) = declared.validate(&call.arguments) {
            tracing::debug!(call_id = %call.call_id, tool = %call.name, error = %error, "tool input rejected");
            return Some(ready(ToolOutcome::Error(error)));
        }

        let tool = declared.tool.clone();
        let input: Value = call.arguments.clone();
        let call_id = call.call_id.clone();
        Some(Box::pin(async move {
            let started = Instant::now();
            tracing::debug!(
                call_id = %call_id,
                tool = tool.name(),
                side_effect = tool.side_effect().as_str(),
                "tool execution started"
            );

            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => Err(ToolError::execution("tool call cancelled")),
                outcome = tokio::time::timeout_at(ctx.deadline.instant(), tool.call(input, &ctx)) => {
                    outcome.unwrap_or_else(|_| Err(ToolError::execution("tool call exceeded the request deadline")))
                }
            };

            let outcome = ToolOutcome::from(result);
            tracing::debug!(
                call_id = %call_id,
                tool = tool.name(),
                duration_ms = started.elapsed().as_millis() as u64,
                is_error = outcome.is_error(),
                "tool execution finished"
            );
            outcome
        }))
    }
}

fn ready(outcome: ToolOutcome) -> ToolFuture {
    Box::pin(std::future::ready(outcome))
}
