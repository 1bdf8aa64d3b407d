//! LiveSession: the bidirectional state machine for one conversation.

use crate::event_log::{EventLog, EventStream};
use crate::interruption::InterruptionController;
use base64::Engine;
use parking_lot::Mutex;
use parley_core::{
    CloseReason, Content, InboundItem, LiveModel, ModelChunk, ParleyError, Part, Result,
    SessionConfig, SessionEventKind, Tool, ToolOutcomePayload,
};
use parley_tool::{
    ConcurrentDispatcher, DispatchUpdate, ExecutionPool, InvocationExecutor, InvocationOutcome,
    ToolInvocation, ToolRegistry, TurnBatch,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle states of a session's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingModelResponse,
    DispatchingTools,
    EmittingFinalResponse,
    Interrupted,
    Closed,
}

/// Opaque checkpoint of an outbound stream position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumptionToken {
    session_id: String,
    last_seq: u64,
}

impl ResumptionToken {
    /// Encode for transport.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token produced by [`encode`](Self::encode).
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ParleyError::config(format!("malformed resumption token: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// One live, bidirectional conversation.
///
/// Exactly one instance exists per logical conversation. Inbound items are
/// enqueued without blocking; outbound events stream with session-scoped
/// sequence numbers. At most one turn is in flight at a time; a new inbound
/// activity signal while a turn runs triggers interruption.
pub struct LiveSession {
    session_id: String,
    inbound_tx: mpsc::UnboundedSender<InboundItem>,
    log: Arc<EventLog>,
    state: Arc<Mutex<SessionState>>,
}

impl LiveSession {
    /// Start building a session.
    pub fn builder() -> LiveSessionBuilder {
        LiveSessionBuilder::new()
    }

    /// This session's id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current event-loop state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Enqueue an inbound item. Never blocks; fails only once the session
    /// is closed.
    pub fn submit(&self, item: InboundItem) -> Result<()> {
        self.inbound_tx.send(item).map_err(|_| ParleyError::SessionClosed)
    }

    /// Ask the session to close gracefully. Equivalent to submitting
    /// [`InboundItem::Close`].
    pub fn close(&self) -> Result<()> {
        self.submit(InboundItem::Close)
    }

    /// Live outbound events from this point on.
    pub fn events(&self) -> EventStream {
        self.log.stream_after(self.log.last_seq())
    }

    /// Checkpoint of the outbound stream position, for reconnection.
    pub fn resumption_token(&self) -> ResumptionToken {
        ResumptionToken { session_id: self.session_id.clone(), last_seq: self.log.last_seq() }
    }

    /// Reconnect the outbound stream after the token's position. Events the
    /// token covers — including delivered tool outcomes — are not replayed.
    pub fn resume(&self, token: &ResumptionToken) -> Result<EventStream> {
        if token.session_id != self.session_id {
            return Err(ParleyError::config("resumption token belongs to a different session"));
        }
        Ok(self.log.stream_after(token.last_seq))
    }
}

/// Builder for [`LiveSession`].
pub struct LiveSessionBuilder {
    model: Option<Arc<dyn LiveModel>>,
    config: SessionConfig,
    tools: Vec<Arc<dyn Tool>>,
    registry: Option<ToolRegistry>,
    pool: Option<Arc<ExecutionPool>>,
}

impl Default for LiveSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            model: None,
            config: SessionConfig::default(),
            tools: Vec::new(),
            registry: None,
            pool: None,
        }
    }

    /// Set the model endpoint (required).
    pub fn model(mut self, model: Arc<dyn LiveModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Start from a pre-built registry instead of individual tools.
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an execution pool across sessions instead of creating one.
    pub fn pool(mut self, pool: Arc<ExecutionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Validate, spawn the event loop, and return the session handle.
    pub fn build(self) -> Result<LiveSession> {
        self.config.validate()?;
        let model = self.model.ok_or_else(|| ParleyError::config("model is required"))?;

        let mut registry = self.registry.unwrap_or_default();
        for tool in self.tools {
            registry.register(tool)?;
        }
        let registry = Arc::new(registry);

        let pool =
            self.pool.unwrap_or_else(|| Arc::new(ExecutionPool::new(self.config.pool_capacity)));
        let executor = Arc::new(InvocationExecutor::new(registry.clone(), pool, &self.config));
        let dispatcher = ConcurrentDispatcher::new(executor);

        let session_id = Uuid::new_v4().to_string();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let log = Arc::new(EventLog::new(self.config.event_buffer));
        let state = Arc::new(Mutex::new(SessionState::Idle));

        let event_loop = SessionLoop {
            session_id: session_id.clone(),
            model,
            registry,
            dispatcher,
            config: self.config,
            log: log.clone(),
            state: state.clone(),
            inbound_rx,
            pending: VecDeque::new(),
            history: Vec::new(),
        };
        tokio::spawn(event_loop.run());

        Ok(LiveSession { session_id, inbound_tx, log, state })
    }
}

// ── Event loop internals ────────────────────────────────────────────────

enum TurnFailure {
    Model(String),
    Fault(String),
    Closed,
}

enum TurnEnd {
    Completed,
    Interrupted,
}

struct SessionLoop {
    session_id: String,
    model: Arc<dyn LiveModel>,
    registry: Arc<ToolRegistry>,
    dispatcher: ConcurrentDispatcher,
    config: SessionConfig,
    log: Arc<EventLog>,
    state: Arc<Mutex<SessionState>>,
    inbound_rx: mpsc::UnboundedReceiver<InboundItem>,
    pending: VecDeque<InboundItem>,
    history: Vec<Content>,
}

impl SessionLoop {
    async fn run(mut self) {
        let reason = self.serve().await;
        debug!(session_id = %self.session_id, ?reason, "session closing");
        self.set_state(SessionState::Closed);
        self.log.emit(SessionEventKind::SessionClosed { reason });
        self.log.close();
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            let item = match self.pending.pop_front() {
                Some(item) => Some(item),
                None => match self.config.idle_timeout {
                    Some(idle) => match tokio::time::timeout(idle, self.inbound_rx.recv()).await {
                        Ok(item) => item,
                        Err(_) => return CloseReason::IdleTimeout,
                    },
                    None => self.inbound_rx.recv().await,
                },
            };
            let Some(item) = item else {
                // Every handle dropped; treat like a graceful close.
                return CloseReason::ClientRequested;
            };
            match item {
                InboundItem::Content { content } => {
                    self.history.push(content);
                    match self.run_turn().await {
                        Ok(_) => {}
                        Err(TurnFailure::Model(message)) => {
                            return CloseReason::ModelFailure { message };
                        }
                        Err(TurnFailure::Fault(message)) => {
                            return CloseReason::SchedulerFault { message };
                        }
                        Err(TurnFailure::Closed) => return CloseReason::ClientRequested,
                    }
                }
                InboundItem::Close => return CloseReason::ClientRequested,
                InboundItem::ActivityStart | InboundItem::ActivityEnd | InboundItem::EndOfTurn => {
                    // No turn in flight; activity signals are only
                    // meaningful as interruption triggers.
                }
            }
        }
    }

    /// One full turn: model rounds interleaved with tool dispatch, until a
    /// final response, an interruption, or the depth bound.
    async fn run_turn(&mut self) -> std::result::Result<TurnEnd, TurnFailure> {
        let turn_id = Uuid::new_v4().to_string();
        let controller = InterruptionController::new(self.config.interruption_ack_timeout);
        let descriptors = self.registry.descriptors();
        let mut depth = 0u32;

        loop {
            self.set_state(SessionState::AwaitingModelResponse);
            let stream = self
                .model
                .stream_turn(&self.history, &descriptors)
                .await
                .map_err(|e| TurnFailure::Model(e.to_string()))?;

            let round = self.stream_model_round(&turn_id, stream).await?;
            let calls = match round {
                ModelRound::Finished { calls } => calls,
                ModelRound::Interrupted => {
                    self.set_state(SessionState::Interrupted);
                    self.log.emit(SessionEventKind::Interrupted { turn_id });
                    self.set_state(SessionState::AwaitingModelResponse);
                    return Ok(TurnEnd::Interrupted);
                }
            };

            if calls.is_empty() {
                self.set_state(SessionState::EmittingFinalResponse);
                self.log.emit(SessionEventKind::TurnComplete { turn_id });
                self.set_state(SessionState::Idle);
                return Ok(TurnEnd::Completed);
            }
            if depth >= self.config.max_tool_depth {
                warn!(
                    session_id = %self.session_id,
                    turn_id = %turn_id,
                    depth,
                    "max tool depth reached; ending turn without dispatching"
                );
                self.log.emit(SessionEventKind::TurnComplete { turn_id });
                self.set_state(SessionState::Idle);
                return Ok(TurnEnd::Completed);
            }
            depth += 1;

            match self.dispatch_round(&turn_id, &controller, calls).await? {
                TurnEnd::Interrupted => return Ok(TurnEnd::Interrupted),
                TurnEnd::Completed => {} // next model round folds the outcomes
            }
        }
    }

    /// Consume one model stream, emitting partials and collecting tool
    /// calls. Inbound activity interrupts by dropping the stream.
    async fn stream_model_round(
        &mut self,
        turn_id: &str,
        mut stream: parley_core::ModelStream,
    ) -> std::result::Result<ModelRound, TurnFailure> {
        let mut calls: Vec<ToolInvocation> = Vec::new();
        let mut text = String::new();

        let outcome = loop {
            let event = tokio::select! {
                biased;
                item = self.inbound_rx.recv() => ModelPhase::Inbound(item),
                chunk = stream.next() => ModelPhase::Chunk(chunk),
            };
            match event {
                ModelPhase::Inbound(Some(InboundItem::ActivityStart)) => {
                    // Barge-in: cancel the in-flight model call.
                    break ModelRound::Interrupted;
                }
                ModelPhase::Inbound(Some(InboundItem::Close)) | ModelPhase::Inbound(None) => {
                    return Err(TurnFailure::Closed);
                }
                ModelPhase::Inbound(Some(other)) => {
                    // Content mid-turn waits its turn: strictly sequential.
                    self.pending.push_back(other);
                }
                ModelPhase::Chunk(Some(Ok(chunk))) => match chunk {
                    ModelChunk::TextDelta(delta) => {
                        text.push_str(&delta);
                        self.log.emit(SessionEventKind::TurnPartial {
                            turn_id: turn_id.to_string(),
                            part: Part::Text { text: delta },
                        });
                    }
                    ModelChunk::AudioDelta(data) => {
                        self.log.emit(SessionEventKind::TurnPartial {
                            turn_id: turn_id.to_string(),
                            part: Part::AudioFrame { mime_type: "audio/pcm".to_string(), data },
                        });
                    }
                    ModelChunk::TranscriptDelta(delta) => {
                        self.log.emit(SessionEventKind::Transcription {
                            turn_id: turn_id.to_string(),
                            text: delta,
                        });
                    }
                    ModelChunk::FunctionCall { id, name, args } => {
                        let mode = self.registry.mode_of(&name).unwrap_or_default();
                        // A duplicate call id from the provider must not be
                        // able to corrupt batch state; mint a fresh one.
                        let id = if !id.is_empty() && calls.iter().any(|c| c.id == id) {
                            warn!(call_id = %id, tool = %name, "duplicate call id from model; reassigning");
                            String::new()
                        } else {
                            id
                        };
                        calls.push(ToolInvocation::new(id, name, args, mode));
                    }
                    ModelChunk::TurnComplete => break ModelRound::Finished { calls },
                },
                ModelPhase::Chunk(None) => break ModelRound::Finished { calls },
                ModelPhase::Chunk(Some(Err(e))) => {
                    return Err(TurnFailure::Model(e.to_string()));
                }
            }
        };

        if !text.is_empty() {
            self.history.push(Content::new("assistant").with_text(std::mem::take(&mut text)));
        }
        if let ModelRound::Finished { calls } = &outcome {
            if !calls.is_empty() {
                let parts = calls
                    .iter()
                    .map(|c| Part::FunctionCall {
                        id: c.id.clone(),
                        name: c.tool_name.clone(),
                        args: c.arguments.clone(),
                    })
                    .collect();
                self.history.push(Content { role: "assistant".to_string(), parts });
            }
        }
        Ok(outcome)
    }

    /// Dispatch one batch of tool calls, forwarding partials and outcomes to
    /// the outbound stream and folding results back into history.
    async fn dispatch_round(
        &mut self,
        turn_id: &str,
        controller: &InterruptionController,
        calls: Vec<ToolInvocation>,
    ) -> std::result::Result<TurnEnd, TurnFailure> {
        self.set_state(SessionState::DispatchingTools);

        let call_names: Vec<(String, String)> =
            calls.iter().map(|c| (c.id.clone(), c.tool_name.clone())).collect();
        for call in &calls {
            self.log.emit(SessionEventKind::ToolCallAnnounced {
                invocation_id: call.id.clone(),
                tool_name: call.tool_name.clone(),
                args: call.arguments.clone(),
            });
        }

        let batch = TurnBatch::new(calls).map_err(|e| TurnFailure::Fault(e.to_string()))?;
        let mut updates = self.dispatcher.dispatch(batch, controller.batch_token());
        let mut outcomes: Vec<(String, InvocationOutcome)> = Vec::new();

        let mut close_after_drain = false;
        let interrupted = loop {
            let event = tokio::select! {
                biased;
                item = self.inbound_rx.recv() => DispatchPhase::Inbound(item),
                update = updates.next() => DispatchPhase::Update(update),
            };
            match event {
                DispatchPhase::Inbound(Some(InboundItem::ActivityStart)) => break true,
                DispatchPhase::Inbound(Some(InboundItem::Close)) | DispatchPhase::Inbound(None) => {
                    close_after_drain = true;
                    break true;
                }
                DispatchPhase::Inbound(Some(other)) => self.pending.push_back(other),
                DispatchPhase::Update(Some(Ok(update))) => {
                    self.forward_update(update, &mut outcomes);
                }
                DispatchPhase::Update(Some(Err(fault))) => {
                    return Err(TurnFailure::Fault(fault.to_string()));
                }
                DispatchPhase::Update(None) => break false,
            }
        };

        if interrupted {
            controller.interrupt();
            self.set_state(SessionState::Interrupted);
            if !close_after_drain {
                self.log.emit(SessionEventKind::Interrupted { turn_id: turn_id.to_string() });
            }
            let log = self.log.clone();
            let mut late = Vec::new();
            controller
                .await_quiescence(&mut updates, |update| {
                    forward_update_to(&log, update, &mut late);
                })
                .await
                .map_err(|fault| TurnFailure::Fault(fault.to_string()))?;
            outcomes.extend(late);

            // Outcomes that completed before the interruption stay useful
            // context; cancellations and failures are not forced on the
            // model.
            let completed: Vec<(String, InvocationOutcome)> = outcomes
                .into_iter()
                .filter(|(_, o)| matches!(o, InvocationOutcome::Completed { .. }))
                .collect();
            if !completed.is_empty() {
                self.fold_outcomes(&call_names, completed);
            }
            if close_after_drain {
                return Err(TurnFailure::Closed);
            }
            self.set_state(SessionState::AwaitingModelResponse);
            return Ok(TurnEnd::Interrupted);
        }

        self.fold_outcomes(&call_names, outcomes);
        Ok(TurnEnd::Completed)
    }

    fn forward_update(
        &self,
        update: DispatchUpdate,
        outcomes: &mut Vec<(String, InvocationOutcome)>,
    ) {
        forward_update_to(&self.log, update, outcomes);
    }

    /// Append function responses for the collected outcomes to history.
    fn fold_outcomes(
        &mut self,
        call_names: &[(String, String)],
        outcomes: Vec<(String, InvocationOutcome)>,
    ) {
        if outcomes.is_empty() {
            return;
        }
        let parts: Vec<Part> = outcomes
            .into_iter()
            .map(|(invocation_id, outcome)| {
                let name = call_names
                    .iter()
                    .find(|(id, _)| *id == invocation_id)
                    .map(|(_, name)| name.clone())
                    .unwrap_or_default();
                let response = outcome.response_value(&name);
                Part::FunctionResponse { id: invocation_id, name, response }
            })
            .collect();
        self.history.push(Content { role: "function".to_string(), parts });
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(session_id = %self.session_id, from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }
}

fn forward_update_to(
    log: &EventLog,
    update: DispatchUpdate,
    outcomes: &mut Vec<(String, InvocationOutcome)>,
) {
    match update {
        DispatchUpdate::Partial(partial) => {
            log.emit(SessionEventKind::ToolOutcome {
                invocation_id: partial.invocation_id,
                payload: ToolOutcomePayload::Partial { seq: partial.seq, value: partial.value },
            });
        }
        DispatchUpdate::Outcome { invocation_id, outcome } => {
            log.emit(SessionEventKind::ToolOutcome {
                invocation_id: invocation_id.clone(),
                payload: outcome.to_payload(),
            });
            outcomes.push((invocation_id, outcome));
        }
    }
}

enum ModelPhase {
    Inbound(Option<InboundItem>),
    Chunk(Option<Result<ModelChunk>>),
}

enum ModelRound {
    Finished { calls: Vec<ToolInvocation> },
    Interrupted,
}

enum DispatchPhase {
    Inbound(Option<InboundItem>),
    Update(Option<Result<DispatchUpdate>>),
}
