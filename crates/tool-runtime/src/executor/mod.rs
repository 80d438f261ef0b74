//! The tool-calling loop for one user turn.
//!
//! Flow: history -> model -> tool-call buffers -> normalize -> consent ->
//! execute (+ chain) -> sanitized history -> model -> ... -> final text.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::accumulator::ToolCallAccumulator;
use crate::action::{MessageAction, ToolCallAction};
use crate::citations::{extract_citations, WEB_SEARCH};
use crate::consent::ConsentDecision;
use crate::history::{sanitize, HistoryEntry};
use crate::normalizer::normalize_tool_call;
use crate::planner::{prepare_chained_args, ExecutionPlan, Planner};
use crate::provider::{ConnectionAdapter, ConnectionError, ModelRequest};
use crate::registry::ToolRegistry;
use crate::session::{SessionContext, UiNotification};
use crate::stream::{ChatEvent, StreamEvent};
use crate::tool::{ToolContext, ToolOutput};

/// Model re-invocations allowed after tool calls within one user turn.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Injected into a chained detail result so the model stops discovering.
pub const CHAIN_GUIDANCE: &str = "Discovery is complete and the details you need are included in \
this result. Do not call discovery tools again; call the specific tool that fulfils the user's \
request now.";

pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    AwaitingModel,
    Streaming,
    Normalizing,
    ConsentCheck,
    Executing,
    RepairingHistory,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingModel => "awaiting_model",
            Self::Streaming => "streaming",
            Self::Normalizing => "normalizing",
            Self::ConsentCheck => "consent_check",
            Self::Executing => "executing",
            Self::RepairingHistory => "repairing_history",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(state: TurnState, depth: usize) {
    debug!(state = %state, depth, "turn state");
}

/// Orchestrates model calls and tool execution for one session.
#[derive(Clone)]
pub struct ToolExecutor {
    adapter: Arc<dyn ConnectionAdapter>,
    tools: Arc<ToolRegistry>,
    model: String,
    system_prompt: Option<String>,
    max_depth: usize,
    temperature: f32,
    max_tokens: u32,
}

impl ToolExecutor {
    pub fn new(
        adapter: Arc<dyn ConnectionAdapter>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            tools,
            model: model.into(),
            system_prompt: None,
            max_depth: DEFAULT_MAX_DEPTH,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    /// Run one user turn. The returned stream is lazy: nothing happens until
    /// it is polled, and it always terminates.
    pub fn stream_chat(&self, history: Vec<HistoryEntry>, session: SessionContext) -> ChatStream {
        self.turn(history, session, None)
    }

    /// Like [`Self::stream_chat`], and once the stream ends the receiver
    /// yields the turn's sanitized history: tool-call and tool-result entries
    /// plus the model's final reply. Runtime guidance text is not included.
    /// The receiver errors if the stream is dropped before it finishes.
    pub fn stream_turn(
        &self,
        history: Vec<HistoryEntry>,
        session: SessionContext,
    ) -> (ChatStream, oneshot::Receiver<Vec<HistoryEntry>>) {
        let (tx, rx) = oneshot::channel();
        (self.turn(history, session, Some(tx)), rx)
    }

    fn turn(
        &self,
        history: Vec<HistoryEntry>,
        session: SessionContext,
        on_done: Option<oneshot::Sender<Vec<HistoryEntry>>>,
    ) -> ChatStream {
        let this = self.clone();

        Box::pin(stream! {
            let mut history = history;
            let mut depth = 0usize;

            loop {
                enter(TurnState::AwaitingModel, depth);
                let request = this.request_for(&history);
                let mut events = match this.adapter.stream(&request).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(provider = this.adapter.provider_name(), error = %e, "model call failed");
                        yield ChatEvent::text(connection_failure_text(&e));
                        break;
                    }
                };

                enter(TurnState::Streaming, depth);
                let mut accumulator = ToolCallAccumulator::new();
                let mut reply = String::new();
                let mut broken = false;
                while let Some(item) = events.next().await {
                    match item {
                        Ok(StreamEvent::Text { content }) => {
                            reply.push_str(&content);
                            yield ChatEvent::Text { content };
                        }
                        Ok(StreamEvent::Usage(usage)) => yield ChatEvent::Usage(usage),
                        Ok(StreamEvent::ToolCallChunk(chunk)) => accumulator.push(chunk),
                        Ok(StreamEvent::ToolResult { content, name, correlation_id }) => {
                            yield ChatEvent::ToolResult {
                                id: correlation_id,
                                name,
                                content,
                                is_error: false,
                            };
                        }
                        Err(e) => {
                            warn!(provider = this.adapter.provider_name(), error = %e, "model stream failed");
                            yield ChatEvent::text(connection_failure_text(&e));
                            broken = true;
                            break;
                        }
                    }
                }
                if broken {
                    break;
                }
                if accumulator.is_empty() {
                    if !reply.trim().is_empty() {
                        history.push(HistoryEntry::assistant(reply));
                    }
                    break;
                }

                if depth >= this.max_depth {
                    warn!(max_depth = this.max_depth, "tool depth exhausted");
                    if !reply.trim().is_empty() {
                        history.push(HistoryEntry::assistant(reply));
                    }
                    let message = MessageAction::assistant(max_depth_text(this.max_depth))
                        .with_metadata("reason", Value::from("max_depth"));
                    yield ChatEvent::Text { content: message.content };
                    break;
                }

                let mut executed = 0usize;
                let mut halted = false;
                let mut aborted = false;
                for buffer in accumulator.finish() {
                    enter(TurnState::Normalizing, depth);
                    let action = match normalize_tool_call(&buffer) {
                        Ok(action) => action,
                        Err(err) if err.recoverable => {
                            warn!(reason = %err.reason, "skipping malformed tool call");
                            continue;
                        }
                        Err(err) => {
                            error!(reason = %err.reason, "invalid tool call, abandoning tool handling for this turn");
                            aborted = true;
                            break;
                        }
                    };

                    history.push(HistoryEntry::assistant_tool_call(&action));
                    yield this.announce_call(&session, &action);

                    enter(TurnState::ConsentCheck, depth);
                    match session.consent.check(&session.session_id, &action.tool).await {
                        ConsentDecision::NotConnected { message } | ConsentDecision::Declined { message } => {
                            yield ChatEvent::text(message);
                            halted = true;
                            continue;
                        }
                        ConsentDecision::NotRequired | ConsentDecision::Granted => {}
                    }

                    enter(TurnState::Executing, depth);
                    let plan = Planner::new(&session.policies).plan(action.clone());
                    let output = this.invoke(&session, &action).await;
                    if action.tool == WEB_SEARCH && !output.is_error {
                        publish_citations(&session, &action.id, &output);
                    }
                    executed += 1;

                    match plan {
                        ExecutionPlan::Chain(steps) => {
                            history.push(HistoryEntry::tool_result(&action.id, &action.tool, &output.content));
                            yield this.announce_result(&session, &action, &output);

                            let Some(placeholder) = steps.into_iter().nth(1) else {
                                continue;
                            };
                            let previous = output
                                .as_json()
                                .unwrap_or_else(|| Value::String(output.content.clone()));
                            let chained = prepare_chained_args(&previous, placeholder);
                            if chained.args.is_empty() {
                                debug!(tool = %action.tool, "no categories discovered, skipping chain");
                                continue;
                            }

                            info!(tool = %action.tool, chained = %chained.tool, "executing chained call");
                            history.push(HistoryEntry::assistant_tool_call(&chained));
                            yield this.announce_call(&session, &chained);
                            let chained_output = with_guidance(this.invoke(&session, &chained).await);
                            history.push(HistoryEntry::tool_result(&chained.id, &chained.tool, &chained_output.content));
                            yield this.announce_result(&session, &chained, &chained_output);
                        }
                        ExecutionPlan::Execute(_) | ExecutionPlan::Noop => {
                            history.push(HistoryEntry::tool_result(&action.id, &action.tool, &output.content));
                            yield this.announce_result(&session, &action, &output);
                        }
                    }
                }

                if aborted || halted || executed == 0 {
                    break;
                }
                enter(TurnState::RepairingHistory, depth);
                depth += 1;
            }

            enter(TurnState::Done, depth);
            if let Some(tx) = on_done {
                // receiver gone means the caller does not keep history
                let _ = tx.send(sanitize(&history));
            }
        })
    }

    /// Drive [`Self::stream_chat`] to completion.
    pub async fn collect_chat(&self, history: Vec<HistoryEntry>, session: SessionContext) -> Vec<ChatEvent> {
        self.stream_chat(history, session).collect().await
    }

    fn request_for(&self, history: &[HistoryEntry]) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages: sanitize(history),
            system_prompt: self.system_prompt.clone(),
            tools: self.tools.list(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Run a tool; failures become a synthetic error result.
    async fn invoke(&self, session: &SessionContext, action: &ToolCallAction) -> ToolOutput {
        session.notify(UiNotification::ExecutingTool {
            name: Some(action.tool.clone()),
        });
        let context = ToolContext {
            session_id: session.session_id.clone(),
            integration_id: session.consent.integration_for(&action.tool),
        };

        info!(tool = %action.tool, id = %action.id, "executing tool");
        let output = match self
            .tools
            .execute(&action.tool, action.args_value(), &context)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %action.tool, error = %e, "tool failed");
                ToolOutput::failure(&action.tool, e)
            }
        };

        session.notify(UiNotification::ExecutingTool { name: None });
        output
    }

    fn announce_call(&self, session: &SessionContext, action: &ToolCallAction) -> ChatEvent {
        session.notify(UiNotification::ToolCall {
            id: action.id.clone(),
            name: action.tool.clone(),
            args: action.args_value(),
        });
        ChatEvent::ToolCall {
            id: action.id.clone(),
            name: action.tool.clone(),
            args: action.args_value(),
        }
    }

    fn announce_result(
        &self,
        session: &SessionContext,
        action: &ToolCallAction,
        output: &ToolOutput,
    ) -> ChatEvent {
        session.notify(UiNotification::ToolResult {
            id: action.id.clone(),
            name: action.tool.clone(),
            content: output.content.clone(),
            is_error: output.is_error,
        });
        ChatEvent::ToolResult {
            id: action.id.clone(),
            name: action.tool.clone(),
            content: output.content.clone(),
            is_error: output.is_error,
        }
    }
}

fn publish_citations(session: &SessionContext, tool_call_id: &str, output: &ToolOutput) {
    let citations = extract_citations(&output.content);
    if citations.is_empty() {
        return;
    }
    debug!(count = citations.len(), "publishing citations");
    session.notify(UiNotification::Citations {
        tool_call_id: tool_call_id.to_string(),
        citations,
    });
}

fn with_guidance(mut output: ToolOutput) -> ToolOutput {
    match output.as_json() {
        Some(Value::Object(mut payload)) => {
            payload.insert("system_guidance".to_string(), Value::from(CHAIN_GUIDANCE));
            output.content = Value::Object(payload).to_string();
        }
        _ => {
            output.content = format!("{}\n\n[system guidance] {}", output.content, CHAIN_GUIDANCE);
        }
    }
    output
}

fn connection_failure_text(err: &ConnectionError) -> String {
    format!(
        "Sorry, I couldn't get a response from the model provider ({}). Please try again.",
        err
    )
}

fn max_depth_text(max_depth: usize) -> String {
    format!(
        "I stopped after {} rounds of tool calls without reaching an answer. \
         Try narrowing the request and I'll pick it up from here.",
        max_depth
    )
}
