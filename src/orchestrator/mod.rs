//! Tool-calling conversation orchestrator.
//!
//! A turn is a chain of background steps. Each step is either one streamed
//! completion or one tool dispatch, runs on its own task and reports back
//! through an [`OrchestratorEvent`]. The owner (the UI loop) feeds those
//! events to [`Orchestrator::on_event`], which updates the transcript and
//! launches the next step. The transcript is only touched by the owner.
//!
//! ```text
//! Idle -> Streaming -> Idle                      (plain answer)
//!                   -> Dispatching -> Streaming  (auto-approved tool)
//!                   -> WaitingConfirm -> Dispatching | Idle
//! ```

mod confirmation;

pub use confirmation::{ConfirmationMediator, PendingConfirmation};

use crate::connection::HandleProvider;
use crate::error::{DbSageError, Result};
use crate::llm::{
    build_messages, build_system_prompt, ChatRequest, LlmClient, Message, StreamAssembler,
    ToolCall, Transcript,
};
use crate::tools::{RiskLevel, ToolCatalog};
use futures::StreamExt;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identifies one turn. Events from earlier turns are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(u64);

impl TurnId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    WaitingConfirm,
    Dispatching,
}

/// Result of a background step, tagged with its turn.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorEvent {
    pub turn: TurnId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A chunk of assistant text, in stream order.
    Text(String),
    /// The stream ended; the assembled assistant message.
    StreamDone(Message),
    StreamFailed(String),
    ToolDone {
        call_id: String,
        name: String,
        body: String,
        ok: bool,
    },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Declined,
    Cancelled,
    Failed(String),
}

/// What the UI should show in response to an event or a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnUpdate {
    Text(String),
    ToolStarted { name: String, summary: String },
    ToolFinished { name: String, ok: bool },
    ConfirmationRequested {
        tool: String,
        risk: RiskLevel,
        prompt: String,
    },
    Finished(TurnOutcome),
}

/// Bookkeeping for the turn in flight.
#[derive(Debug, Clone, Copy)]
struct ActiveTurn {
    id: TurnId,
    /// Transcript length before the user message was pushed.
    start: usize,
    /// Whether a tool result has been appended during this turn.
    resolved_any: bool,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    handles: Arc<dyn HandleProvider>,
    turn_timeout: Option<Duration>,
    transcript: Transcript,
    state: TurnState,
    turn: Option<ActiveTurn>,
    cancel: CancellationToken,
    mediator: ConfirmationMediator,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Creates an orchestrator and the receiver its background steps report
    /// to. Every received event must be passed to [`Self::on_event`].
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<ToolCatalog>,
        handles: Arc<dyn HandleProvider>,
        turn_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mediator = ConfirmationMediator::new(Arc::clone(&catalog));
        let orchestrator = Self {
            llm,
            catalog,
            handles,
            turn_timeout,
            transcript: Transcript::new(),
            state: TurnState::Idle,
            turn: None,
            cancel: CancellationToken::new(),
            mediator,
            events,
        };
        (orchestrator, rx)
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != TurnState::Idle
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        self.turn.map(|t| t.id)
    }

    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.mediator.pending()
    }

    /// Starts a turn with the user's message.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<TurnId> {
        if self.is_busy() {
            return Err(DbSageError::busy(
                "Still working on the previous request. Press Ctrl-C to cancel it.",
            ));
        }

        let id = TurnId::new();
        self.turn = Some(ActiveTurn {
            id,
            start: self.transcript.len(),
            resolved_any: false,
        });
        self.cancel = CancellationToken::new();
        self.transcript.push(Message::user(text));

        info!(turn = %id, messages = self.transcript.len(), "Turn started");
        self.start_stream(id);
        Ok(id)
    }

    /// Applies the result of a background step.
    pub async fn on_event(&mut self, event: OrchestratorEvent) -> Vec<TurnUpdate> {
        let Some(turn) = self.turn.filter(|t| t.id == event.turn) else {
            debug!(turn = %event.turn, "Discarding event from an abandoned turn");
            return Vec::new();
        };

        match (self.state, event.kind) {
            (TurnState::Streaming, EventKind::Text(text)) => vec![TurnUpdate::Text(text)],
            (TurnState::Streaming, EventKind::StreamDone(message)) => {
                self.on_stream_done(turn, message).await
            }
            (TurnState::Streaming, EventKind::StreamFailed(error)) => {
                // Only the user message needs undoing; a failed stream appends nothing.
                if !turn.resolved_any {
                    self.transcript.truncate(turn.start);
                }
                warn!(turn = %turn.id, error = %error, "Turn failed");
                self.finish(TurnOutcome::Failed(error))
            }
            (
                TurnState::Dispatching,
                EventKind::ToolDone {
                    call_id,
                    name,
                    body,
                    ok,
                },
            ) => {
                self.transcript.push(Message::tool(call_id, body));
                self.mark_resolved();
                self.start_stream(turn.id);
                vec![TurnUpdate::ToolFinished { name, ok }]
            }
            (state, kind) => {
                debug!(turn = %turn.id, ?state, ?kind, "Ignoring out-of-order event");
                Vec::new()
            }
        }
    }

    /// Delivers the user's decision on the pending confirmation.
    pub async fn resume(&mut self, approved: bool) -> Result<Vec<TurnUpdate>> {
        let pending = self
            .mediator
            .take()
            .ok_or_else(|| DbSageError::internal("No tool call is waiting for confirmation"))?;

        if self.state != TurnState::WaitingConfirm || self.current_turn() != Some(pending.turn) {
            self.reset();
            return Err(DbSageError::internal(
                "Confirmation does not belong to the current turn",
            ));
        }

        if !approved {
            info!(turn = %pending.turn, tool = pending.call.name(), "Tool call declined");
            return Ok(self.finish(TurnOutcome::Declined));
        }

        info!(turn = %pending.turn, tool = pending.call.name(), "Tool call approved");
        Ok(vec![self.start_dispatch(pending.turn, pending.call, pending.arguments)])
    }

    /// Abandons the turn in flight. Returns `None` when idle.
    ///
    /// Messages already appended stay; late events from the abandoned
    /// steps are discarded.
    pub fn cancel(&mut self) -> Option<TurnUpdate> {
        if !self.is_busy() {
            return None;
        }

        self.cancel.cancel();
        self.mediator.discard();
        if let Some(turn) = self.turn {
            info!(turn = %turn.id, "Turn cancelled");
        }
        self.finish(TurnOutcome::Cancelled).pop()
    }

    /// Forgets the conversation.
    pub fn clear(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(DbSageError::busy(
                "Cannot clear the conversation while a request is running",
            ));
        }
        self.transcript.clear();
        self.turn = None;
        Ok(())
    }

    async fn on_stream_done(&mut self, turn: ActiveTurn, mut message: Message) -> Vec<TurnUpdate> {
        if message.tool_calls.len() > 1 {
            debug!(
                turn = %turn.id,
                dropped = message.tool_calls.len() - 1,
                "Keeping only the first tool call"
            );
            message.tool_calls.truncate(1);
        }

        let call = message.tool_calls.first().cloned();
        self.transcript.push(message);

        match call {
            None => {
                info!(turn = %turn.id, messages = self.transcript.len(), "Turn completed");
                self.finish(TurnOutcome::Completed)
            }
            Some(call) => self.process_call(turn, call).await,
        }
    }

    async fn process_call(&mut self, turn: ActiveTurn, call: ToolCall) -> Vec<TurnUpdate> {
        let name = call.name().to_string();

        // Bad arguments never reach the confirmation dialog.
        let parsed = match self.catalog.get(&name) {
            Some(_) => call.parse_arguments().and_then(|arguments| {
                self.catalog.validate(&name, &arguments)?;
                Ok(arguments)
            }),
            None => Err(DbSageError::UnknownTool(name.clone())),
        };
        let arguments = match parsed {
            Ok(arguments) => arguments,
            Err(error) => {
                warn!(turn = %turn.id, tool = %name, error = %error, "Rejecting tool call");
                self.transcript.push(Message::tool(call.id, error.to_tool_body()));
                self.mark_resolved();
                self.start_stream(turn.id);
                return vec![TurnUpdate::ToolFinished { name, ok: false }];
            }
        };

        if !self.catalog.requires_confirmation(&name) {
            return vec![self.start_dispatch(turn.id, call, arguments)];
        }

        let backend = self.handles.current_target().await.map(|(_, b)| b);
        match self
            .mediator
            .request(turn.id, self.transcript.len(), call, arguments, backend)
        {
            Ok(update) => {
                self.state = TurnState::WaitingConfirm;
                vec![update]
            }
            Err(e) => {
                warn!(turn = %turn.id, error = %e, "Confirmation request failed");
                self.finish(TurnOutcome::Failed(e.to_string()))
            }
        }
    }

    fn start_stream(&mut self, turn: TurnId) {
        self.state = TurnState::Streaming;

        let step = StreamStep {
            llm: Arc::clone(&self.llm),
            handles: Arc::clone(&self.handles),
            transcript: self.transcript.clone(),
            tools: self.catalog.describe_all(),
            timeout: self.turn_timeout,
            events: self.events.clone(),
            turn,
        };
        let cancel = self.cancel.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(turn = %turn, "Stream abandoned");
                }
                result = step.run() => {
                    let kind = match result {
                        Ok(message) => EventKind::StreamDone(message),
                        Err(e) => EventKind::StreamFailed(e.to_string()),
                    };
                    let _ = events.send(OrchestratorEvent { turn, kind });
                }
            }
        });
    }

    fn start_dispatch(&mut self, turn: TurnId, call: ToolCall, arguments: Value) -> TurnUpdate {
        self.state = TurnState::Dispatching;
        let update = TurnUpdate::ToolStarted {
            name: call.name().to_string(),
            summary: self.catalog.summarize(call.name(), &arguments),
        };

        let catalog = Arc::clone(&self.catalog);
        let handles = Arc::clone(&self.handles);
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let name = call.function.name;
        let call_id = call.id;

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(turn = %turn, tool = %name, "Dispatch abandoned");
                }
                (body, ok) = dispatch_call(&catalog, handles.as_ref(), &name, &arguments) => {
                    let kind = EventKind::ToolDone {
                        name: name.clone(),
                        call_id,
                        body,
                        ok,
                    };
                    let _ = events.send(OrchestratorEvent { turn, kind });
                }
            }
        });

        update
    }

    fn mark_resolved(&mut self) {
        if let Some(turn) = self.turn.as_mut() {
            turn.resolved_any = true;
        }
    }

    fn finish(&mut self, outcome: TurnOutcome) -> Vec<TurnUpdate> {
        self.state = TurnState::Idle;
        self.turn = None;
        vec![TurnUpdate::Finished(outcome)]
    }

    fn reset(&mut self) {
        self.cancel.cancel();
        self.mediator.discard();
        self.state = TurnState::Idle;
    }
}

/// One streamed completion.
struct StreamStep {
    llm: Arc<dyn LlmClient>,
    handles: Arc<dyn HandleProvider>,
    transcript: Transcript,
    tools: Vec<Value>,
    timeout: Option<Duration>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    turn: TurnId,
}

impl StreamStep {
    async fn run(self) -> Result<Message> {
        let Some(limit) = self.timeout else {
            return self.stream().await;
        };

        match tokio::time::timeout(limit, self.stream()).await {
            Ok(result) => result,
            Err(_) => Err(DbSageError::llm(format!(
                "No complete response within {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn stream(&self) -> Result<Message> {
        let target = self.handles.current_target().await;
        let system = build_system_prompt(target.as_ref().map(|(name, b)| (name.as_str(), *b)));
        let request = ChatRequest {
            messages: build_messages(system, &self.transcript),
            tools: self.tools.clone(),
        };

        let mut stream = self.llm.stream_chat(request).await?;
        let mut assembler = StreamAssembler::new();
        while let Some(delta) = stream.next().await {
            if let Some(text) = assembler.push(delta?) {
                let _ = self.events.send(OrchestratorEvent {
                    turn: self.turn,
                    kind: EventKind::Text(text),
                });
            }
        }
        Ok(assembler.finish())
    }
}

/// Runs one tool against the current connection. Returns the response body
/// and whether it is a success.
async fn dispatch_call(
    catalog: &ToolCatalog,
    handles: &dyn HandleProvider,
    name: &str,
    arguments: &Value,
) -> (String, bool) {
    let body = match handles.current_handle().await {
        Ok((db, connection)) => {
            debug!(tool = name, connection = %connection, "Dispatching tool");
            catalog.dispatch(Some(db.as_ref()), name, arguments).await
        }
        Err(DbSageError::NoActiveConnection) => catalog.dispatch(None, name, arguments).await,
        Err(e) => Ok(e.to_tool_body()),
    };

    let body = body.unwrap_or_else(|e| e.to_tool_body());
    let ok = !is_error_body(&body);
    (body, ok)
}

fn is_error_body(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.as_object().map(|o| o.contains_key("error")))
        .unwrap_or(false)
}
