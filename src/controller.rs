//! Drives one generation request from dispatch to its terminal event.
//!
//! A request moves through
//! `Queued → Dispatched → Streaming ⇄ ToolPending → Finalizing` and ends in
//! exactly one of `Completed`, `Failed` or `Aborted`. Each backend round is
//! opened through [`retry_before_output`], which retries until the first
//! event is in hand; anything that fails after that is terminal.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesOrdered;
use futures_util::{FutureExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::accumulator::TurnAccumulator;
use crate::multiplexer::{self, EventSink, EventStream, DEFAULT_CAPACITY};
use crate::registry::{ProviderBinding, ProviderRegistry};
use crate::resilience::{retry_before_output, Deadline};
use crate::response::BackendStream;
use crate::tools::{ToolContext, ToolDispatcher, ToolOutcome, ToolSet};
use crate::types::{
    BackendEvent, BackendRequest, Conversation, EventPayload, FinishReason, GenerationConfig,
    ToolCall, Usage,
};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Queued,
    Dispatched,
    Streaming,
    ToolPending,
    Finalizing,
    Completed,
    Failed,
    Aborted,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Failed | GenerationState::Aborted
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn allows(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Aborted) => true,
            (Queued, Dispatched)
            | (Dispatched, Streaming)
            | (Streaming, ToolPending | Finalizing)
            | (ToolPending, Streaming | Finalizing)
            | (Finalizing, Completed) => true,
            _ => false,
        }
    }
}

/// Everything needed to run one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub conversation: Conversation,
    pub model: String,
    pub tools: ToolSet,
    pub config: GenerationConfig,
    /// Result of the caller's access check for `model`.
    pub allowed: bool,
}

impl GenerationRequest {
    pub fn new(conversation: impl Into<Conversation>, model: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            model: model.into(),
            tools: ToolSet::new(),
            config: GenerationConfig::default(),
            allowed: true,
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = allowed;
        self
    }
}

/// Terminal record of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub duration: Duration,
}

/// Starts generations against a shared registry.
#[derive(Debug, Clone)]
pub struct GenerationController {
    registry: Arc<ProviderRegistry>,
    channel_capacity: usize,
}

impl GenerationController {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            channel_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn prepare(&self, request: GenerationRequest) -> Result<(Run, EventStream), Error> {
        let binding = self.registry.resolve(&request.model)?.clone();
        if !request.allowed {
            return Err(Error::AccessDenied {
                model: request.model,
                reason: "caller may not use this model".to_string(),
            });
        }

        let cancel = CancellationToken::new();
        let (sink, events) = multiplexer::channel(self.channel_capacity, cancel.clone());
        let run = Run {
            state: GenerationState::Queued,
            dispatcher: ToolDispatcher::new(request.tools),
            conversation: request.conversation,
            deadline: Deadline::after(request.config.deadline),
            config: request.config,
            binding,
            cancel,
            sink,
            usage: Usage::default(),
            history: Vec::new(),
        };
        Ok((run, events))
    }

    /// Validate the request and spawn its generation task.
    ///
    /// Unknown models and denied access fail here, before any event
    /// exists. Must be called within a tokio runtime.
    pub fn start(&self, request: GenerationRequest) -> Result<GenerationHandle, Error> {
        let (mut run, events) = self.prepare(request)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let cancel = run.cancel.clone();

        let span = tracing::info_span!(
            "generation",
            request_id = %request_id,
            model = %run.binding.descriptor().id,
            provider = run.binding.provider_name(),
        );
        let task = tokio::spawn(async move { run.execute().await }.instrument(span));

        Ok(GenerationHandle {
            request_id,
            events,
            cancel,
            task,
        })
    }
}

/// Caller's side of a running generation.
///
/// Dropping the event stream aborts the request, so drain
/// [`GenerationHandle::events`] before awaiting the outcome.
pub struct GenerationHandle {
    request_id: String,
    events: EventStream,
    cancel: CancellationToken,
    task: JoinHandle<GenerationOutcome>,
}

impl GenerationHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Take the event stream, leaving the task to run detached.
    pub fn into_events(self) -> EventStream {
        self.events
    }

    /// Cancel the request. No event is delivered after this returns.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn outcome(self) -> GenerationOutcome {
        let GenerationHandle { events, task, .. } = self;
        let outcome = task.await;
        drop(events);
        outcome.unwrap_or_else(|error| {
            tracing::error!(error = %error, "generation task panicked");
            GenerationOutcome {
                finish_reason: FinishReason::Error,
                usage: Usage::default(),
                duration: Duration::ZERO,
            }
        })
    }
}

type PendingTool = BoxFuture<'static, (ToolCall, ToolOutcome)>;

/// Bookkeeping for one backend round.
#[derive(Default)]
struct Round {
    accumulator: TurnAccumulator,
    pending: FuturesOrdered<PendingTool>,
    in_flight: Vec<String>,
    results: Vec<(ToolCall, ToolOutcome)>,
    backend_done: bool,
}

struct Run {
    state: GenerationState,
    dispatcher: ToolDispatcher,
    conversation: Conversation,
    config: GenerationConfig,
    binding: ProviderBinding,
    deadline: Deadline,
    cancel: CancellationToken,
    sink: EventSink,
    usage: Usage,
    history: Vec<GenerationState>,
}

impl Run {
    async fn execute(&mut self) -> GenerationOutcome {
        let cancel = self.cancel.clone();
        let deadline = self.deadline;
        let provider = self.binding.provider_name().to_string();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Aborted),
            result = tokio::time::timeout_at(deadline.instant(), self.drive()) => {
                result.unwrap_or_else(|_| Err(Error::timeout(provider, deadline.elapsed().as_millis() as u64)))
            }
        };

        let finish_reason = match result {
            Ok(reason) => {
                self.transition(GenerationState::Finalizing);
                let finish = EventPayload::Finish {
                    finish_reason: reason,
                    usage: self.usage,
                    model: self.binding.descriptor().id.clone(),
                    completion_time_ms: deadline.elapsed().as_millis() as u64,
                };
                if self.sink.emit(finish).await.is_some() {
                    self.transition(GenerationState::Completed);
                    reason
                } else {
                    self.transition(GenerationState::Aborted);
                    FinishReason::Aborted
                }
            }
            Err(_) if cancel.is_cancelled() => {
                self.transition(GenerationState::Aborted);
                FinishReason::Aborted
            }
            Err(Error::Aborted) => {
                self.transition(GenerationState::Aborted);
                FinishReason::Aborted
            }
            Err(error) => {
                tracing::warn!(kind = error.kind(), error = %error, "generation failed");
                self.transition(GenerationState::Failed);
                self.sink.emit(EventPayload::error(&error)).await;
                FinishReason::Error
            }
        };

        let outcome = GenerationOutcome {
            finish_reason,
            usage: self.usage,
            duration: deadline.elapsed(),
        };
        tracing::info!(
            finish_reason = ?outcome.finish_reason,
            duration_ms = outcome.duration.as_millis() as u64,
            output_tokens = outcome.usage.output_tokens,
            "generation finished"
        );
        outcome
    }

    fn transition(&mut self, next: GenerationState) {
        if !self.state.allows(next) {
            tracing::warn!(from = ?self.state, to = ?next, "unexpected state transition");
        } else {
            tracing::debug!(from = ?self.state, to = ?next, "state transition");
        }
        self.state = next;
        self.history.push(next);
    }

    async fn drive(&mut self) -> Result<FinishReason, Error> {
        self.transition(GenerationState::Dispatched);
        let mut tool_rounds = 0u32;

        loop {
            let request = self.backend_request();
            let (first, stream) = self.open_round(&request).await?;
            self.transition(GenerationState::Streaming);

            let round = self.stream_round(first, stream).await?;
            let turn = round.accumulator.finalize();
            self.usage = self.usage.add(turn.usage);

            if round.results.is_empty() {
                return Ok(FinishReason::Stop);
            }

            // Results are fed back on the next round; the request stays
            // tool-pending until that round opens.
            if self.state == GenerationState::Streaming {
                self.transition(GenerationState::ToolPending);
            }

            self.conversation.push_turn(&turn);
            for (call, outcome) in &round.results {
                self.conversation.push_tool_output(call, outcome.to_feedback());
            }

            tool_rounds += 1;
            if tool_rounds >= self.config.max_tool_rounds {
                tracing::info!(tool_rounds, "tool round limit reached");
                return Ok(FinishReason::ToolLimit);
            }
        }
    }

    fn backend_request(&self) -> BackendRequest {
        BackendRequest {
            model: self.binding.upstream_model().to_string(),
            system: self.config.system_prompt.clone(),
            messages: self.conversation.items().to_vec(),
            max_output_tokens: Some(self.binding.descriptor().max_output_tokens),
            tools: self.dispatcher.tools().specs(),
            tool_choice: self.config.tool_choice,
        }
    }

    /// Call the backend and wait for its first event, retrying failures
    /// that happen before that point.
    async fn open_round(
        &self,
        request: &BackendRequest,
    ) -> Result<(Option<BackendEvent>, BackendStream), Error> {
        let binding = &self.binding;
        retry_before_output(
            &self.config.retry,
            &self.deadline,
            &self.cancel,
            binding.provider_name(),
            |attempt| async move {
                tracing::debug!(attempt, "opening backend round");
                let mut stream = binding.generate(request).await?.stream();
                match stream.next().await {
                    Some(Ok(first)) => Ok((Some(first), stream)),
                    Some(Err(error)) => Err(error),
                    None => Ok((None, stream)),
                }
            },
        )
        .await
    }

    async fn stream_round(
        &mut self,
        first: Option<BackendEvent>,
        mut stream: BackendStream,
    ) -> Result<Round, Error> {
        let mut round = Round::default();
        match first {
            Some(event) => self.on_event(event, &mut round).await?,
            None => round.backend_done = true,
        }

        while !(round.backend_done && round.pending.is_empty()) {
            tokio::select! {
                biased;
                event = stream.next(), if !round.backend_done => match event {
                    Some(Ok(event)) => self.on_event(event, &mut round).await?,
                    Some(Err(error)) => {
                        if !round.in_flight.is_empty() {
                            tracing::warn!(
                                call_ids = ?round.in_flight,
                                error = %error,
                                "backend failed while tools were running; discarding their results"
                            );
                        }
                        return Err(error);
                    }
                    None => round.backend_done = true,
                },
                Some((call, outcome)) = round.pending.next(), if !round.pending.is_empty() => {
                    self.on_tool_result(call, outcome, &mut round).await?;
                }
            }
        }
        Ok(round)
    }

    async fn on_event(&mut self, event: BackendEvent, round: &mut Round) -> Result<(), Error> {
        match event {
            BackendEvent::TextDelta { ref text } | BackendEvent::ReasoningDelta { ref text } => {
                if text.is_empty() {
                    return Ok(());
                }
                self.resume_streaming(round).await?;
                round.accumulator.process_event(&event);
                let payload = match event {
                    BackendEvent::ReasoningDelta { text } => EventPayload::ReasoningDelta { text },
                    BackendEvent::TextDelta { text } => EventPayload::TextDelta { text },
                    _ => return Ok(()),
                };
                self.emit(payload).await
            }
            BackendEvent::Buffered {
                ref text,
                ref reasoning,
            } => {
                self.resume_streaming(round).await?;
                round.accumulator.process_event(&event);
                if let Some(reasoning) = reasoning.as_ref().filter(|r| !r.is_empty()) {
                    self.emit(EventPayload::ReasoningDelta {
                        text: reasoning.clone(),
                    })
                    .await?;
                }
                if !text.is_empty() {
                    self.emit(EventPayload::TextDelta { text: text.clone() }).await?;
                }
                Ok(())
            }
            BackendEvent::ToolCall { call } => self.dispatch(call, round).await,
            BackendEvent::Done { .. } => {
                round.accumulator.process_event(&event);
                round.backend_done = true;
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, call: ToolCall, round: &mut Round) -> Result<(), Error> {
        let ctx = ToolContext {
            call_id: call.call_id.clone(),
            timezone: self.config.timezone.clone(),
            search_provider: self.config.search_provider.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        };
        let Some(future) = self.dispatcher.begin(&call, ctx) else {
            return Ok(());
        };

        if self.state == GenerationState::Streaming {
            self.transition(GenerationState::ToolPending);
        }
        self.emit(EventPayload::ToolCallStarted {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            input: call.arguments.clone(),
        })
        .await?;

        round.accumulator.push_call(call.clone());
        round.in_flight.push(call.call_id.clone());
        round
            .pending
            .push_back(future.map(move |outcome| (call, outcome)).boxed());
        Ok(())
    }

    /// Deliver every outstanding tool result, in issue order, before
    /// more model output goes out.
    async fn resume_streaming(&mut self, round: &mut Round) -> Result<(), Error> {
        while let Some((call, outcome)) = round.pending.next().await {
            self.on_tool_result(call, outcome, round).await?;
        }
        if self.state == GenerationState::ToolPending {
            self.transition(GenerationState::Streaming);
        }
        Ok(())
    }

    async fn on_tool_result(
        &mut self,
        call: ToolCall,
        outcome: ToolOutcome,
        round: &mut Round,
    ) -> Result<(), Error> {
        round.in_flight.retain(|id| id != &call.call_id);

        if let ToolOutcome::Error(error) = &outcome {
            if self.config.fatal_tools.contains(&call.name) {
                return Err(error.clone().into_request_error(&call.name));
            }
            tracing::debug!(call_id = %call.call_id, tool = %call.name, error = %error, "tool call failed");
        }

        self.emit(EventPayload::tool_result(call.call_id.clone(), outcome.clone()))
            .await?;
        round.results.push((call, outcome));
        Ok(())
    }

    async fn emit(&self, payload: EventPayload) -> Result<(), Error> {
        match self.sink.emit(payload).await {
            Some(_) => Ok(()),
            None => Err(Error::Aborted),
        }
    }
}
