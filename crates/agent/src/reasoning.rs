//! The reasoning loop: an explicit, step-bounded state machine.
//!
//! ```text
//! Thinking ─┬─ answer ──────────────▶ Answering ─▶ Done
//!           ├─ tool intent ─────────▶ ToolCalling ─┐
//!           └─ retrieval intent ────▶ Retrieving ──┴─▶ Thinking
//! step budget spent ───────────────▶ Aborted   (best-effort answer)
//! stop requested between steps ────▶ Cancelled (partial answer, maybe empty)
//! ```
//!
//! Every model call is one step. Tool and retrieval calls in a step run one
//! after another; each observation goes back to the model before it decides
//! again. Intents the session has switched off are never executed: the model
//! is not offered them, and if it asks anyway it is told they are unavailable.

use chrono::Utc;
use parley_config::AppConfig;
use parley_core::document::ScoredChunk;
use parley_core::error::{Error, ToolError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::{Message, SessionId, ToolInvocation};
use parley_core::provider::{ChatMessage, Provider, ProviderRequest};
use parley_core::session::SessionFlags;
use parley_core::tool::{ToolContext, ToolKind, ToolRegistry, ToolSpec};
use parley_knowledge::Retriever;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::intent::{self, ActionRequest, Intent};
use crate::prompt::{self, SystemContext};
use crate::scratchpad::Scratchpad;
use crate::stream_event::AgentStreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Thinking,
    Answering,
    ToolCalling,
    Retrieving,
    Done,
    Aborted,
    Cancelled,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Answering => "answering",
            Self::ToolCalling => "tool_calling",
            Self::Retrieving => "retrieving",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Cancelled)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user turn, with the context it runs in.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: SessionId,
    /// Stored messages before this turn, oldest first
    pub history: Vec<Message>,
    /// The new user message (text plus optional image)
    pub user: Message,
    pub flags: SessionFlags,
    /// Files uploaded into this session
    pub documents: Vec<String>,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// `Done`, `Aborted` or `Cancelled`
    pub state: LoopState,
    /// Final answer; best effort when aborted, partial (possibly empty) when cancelled
    pub answer: String,
    pub steps: u32,
    pub tool_invocations: Vec<ToolInvocation>,
    pub scratchpad: Scratchpad,
}

impl TurnOutcome {
    pub fn budget_exceeded(&self) -> bool {
        self.state == LoopState::Aborted
    }
}

/// Process-wide loop settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    pub max_steps: u32,
    /// Extra attempts for a tool call that timed out
    pub tool_retries: u32,
    /// Wait before the first retry, doubled for each later one
    pub tool_retry_delay: Duration,
    pub history_window: usize,
    pub prefetch_context: bool,
    pub retrieval_k: usize,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| prompt::DEFAULT_SYSTEM_PROMPT.to_string()),
            max_steps: config.agent.max_steps,
            tool_retries: config.tools.max_retries,
            tool_retry_delay: config.agent.retry_base_delay(),
            history_window: config.agent.history_window,
            prefetch_context: config.agent.prefetch_context,
            retrieval_k: config.retrieval.top_k,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct ReasoningLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    retriever: Option<Arc<Retriever>>,
    settings: LoopSettings,
    events: Option<Arc<EventBus>>,
}

impl ReasoningLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, settings: LoopSettings) -> Self {
        Self {
            provider,
            tools,
            retriever: None,
            settings,
            events: None,
        }
    }

    /// Retriever used for context prefetch.
    pub fn with_retriever(mut self, retriever: Arc<Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Tools the model may call under `flags`.
    pub fn offered_tools(&self, flags: SessionFlags) -> Vec<ToolSpec> {
        self.tools
            .list_tools()
            .into_iter()
            .filter(|spec| allowed(spec.kind, flags))
            .collect()
    }

    /// Run one turn to a terminal state.
    ///
    /// `cancel` is checked between steps; a tool call in progress always
    /// finishes. Model failures that survive the provider's retries are
    /// returned as errors; everything else ends in a [`TurnOutcome`].
    pub async fn run(
        &self,
        input: TurnInput,
        cancel: CancellationToken,
        stream: Option<mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnOutcome, Error> {
        let emitter = Emitter(stream);
        let offered = self.offered_tools(input.flags);
        let definitions: Vec<_> = offered.iter().map(ToolSpec::to_definition).collect();
        let prefetched = self.prefetch(&input, &emitter).await;

        let mut messages = vec![prompt::system_message(&SystemContext {
            base: &self.settings.system_prompt,
            tools: &offered,
            documents: &input.documents,
            prefetched: &prefetched,
        })];
        messages.extend(prompt::history_messages(&input.history, self.settings.history_window));
        messages.push(prompt::user_message(&input.user));

        let mut pad = Scratchpad::new(self.settings.max_steps);
        let mut invocations = Vec::new();

        info!(
            session_id = %input.session_id,
            model = %self.settings.model,
            max_steps = pad.max_steps,
            tools = offered.len(),
            image = input.user.image.is_some(),
            "Turn started"
        );

        let (state, answer) = loop {
            if cancel.is_cancelled() {
                break (LoopState::Cancelled, partial_answer(&pad));
            }
            if !pad.tick() {
                warn!(session_id = %input.session_id, steps = pad.steps, "Step budget exhausted");
                break (LoopState::Aborted, pad.best_effort_answer());
            }
            let step = pad.steps;
            debug!(session_id = %input.session_id, step, state = %LoopState::Thinking, "Calling model");

            let request = ProviderRequest {
                model: self.settings.model.clone(),
                messages: messages.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: definitions.clone(),
            };
            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    let err = Error::from(e);
                    warn!(session_id = %input.session_id, step, error = %err, "Model call failed");
                    emitter
                        .send(AgentStreamEvent::Error {
                            kind: err.kind().to_string(),
                            message: err.user_facing().message,
                        })
                        .await;
                    self.publish(DomainEvent::ErrorOccurred {
                        context: format!("turn:{}", input.session_id),
                        error_message: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(err);
                }
            };

            match intent::parse(&response.message, step) {
                Intent::Answer(text) => {
                    debug!(session_id = %input.session_id, step, state = %LoopState::Answering, "Model answered");
                    let answer = if text.is_empty() {
                        "I could not produce an answer to that.".to_string()
                    } else {
                        text
                    };
                    break (LoopState::Done, answer);
                }
                Intent::Act { thought, calls, native } => {
                    pad.add_thought(&thought);
                    if !thought.is_empty() {
                        emitter
                            .send(AgentStreamEvent::Thought {
                                step,
                                content: thought,
                            })
                            .await;
                    }
                    if cancel.is_cancelled() {
                        break (LoopState::Cancelled, partial_answer(&pad));
                    }

                    messages.push(response.message.clone());
                    for call in &calls {
                        let observation = self
                            .act(call, &input, &mut pad, &mut invocations, &emitter)
                            .await;
                        messages.push(if native {
                            ChatMessage::tool_result(call.id.clone(), observation)
                        } else {
                            prompt::observation_message(&call.name, &observation)
                        });
                    }
                }
            }
        };

        if !answer.is_empty() {
            emitter
                .send(AgentStreamEvent::Answer {
                    content: answer.clone(),
                    truncated: state == LoopState::Cancelled,
                })
                .await;
        }
        emitter
            .send(AgentStreamEvent::Done {
                session_id: input.session_id.to_string(),
                state: state.to_string(),
                steps: pad.steps,
                tool_calls_made: invocations.len(),
            })
            .await;
        self.publish(DomainEvent::TurnCompleted {
            session_id: input.session_id.to_string(),
            state: state.to_string(),
            steps: pad.steps,
            timestamp: Utc::now(),
        });
        info!(
            session_id = %input.session_id,
            state = %state,
            steps = pad.steps,
            tool_calls = invocations.len(),
            "Turn finished"
        );

        Ok(TurnOutcome {
            state,
            answer,
            steps: pad.steps,
            tool_invocations: invocations,
            scratchpad: pad,
        })
    }

    /// Execute one requested call and return the observation for the model.
    async fn act(
        &self,
        call: &ActionRequest,
        input: &TurnInput,
        pad: &mut Scratchpad,
        invocations: &mut Vec<ToolInvocation>,
        emitter: &Emitter,
    ) -> String {
        pad.add_action(&format!("{}({})", call.name, call.input));
        emitter
            .send(AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            })
            .await;

        let kind = self.tools.get(&call.name).map(|t| t.kind());
        if let Some(kind) = kind.filter(|k| !allowed(*k, input.flags)) {
            debug!(session_id = %input.session_id, tool = %call.name, ?kind, "Model asked for a disabled intent");
            let observation = format!(
                "Error: '{}' is not available in this conversation. Answer without it.",
                call.name
            );
            pad.add_observation(&observation);
            emitter
                .send(AgentStreamEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: observation.clone(),
                    success: false,
                })
                .await;
            return observation;
        }

        let state = match kind {
            Some(ToolKind::Retrieval) => LoopState::Retrieving,
            _ => LoopState::ToolCalling,
        };
        debug!(session_id = %input.session_id, tool = %call.name, state = %state, "Executing");

        let ctx = ToolContext::new(input.session_id.clone());
        let attempts = self.settings.tool_retries.saturating_add(1);
        let mut attempt = 1;
        let (record, result) = loop {
            let (record, result) = self
                .tools
                .invoke_recorded(&call.name, call.input.clone(), &ctx)
                .await;
            match &result {
                Err(ToolError::Timeout { .. }) if attempt < attempts => {
                    let delay = tool_backoff(self.settings.tool_retry_delay, attempt);
                    warn!(tool = %call.name, attempt, of = attempts, ?delay, "Tool timed out, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => break (record, result),
            }
        };

        self.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: record.succeeded(),
            duration_ms: record.latency_ms,
            timestamp: Utc::now(),
        });

        let (observation, success) = match result {
            Ok(output) => {
                if state == LoopState::Retrieving {
                    emitter.send(retrieval_event(output.data.as_ref())).await;
                }
                (output.output, output.success)
            }
            Err(e) => {
                warn!(session_id = %input.session_id, tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {e}"), false)
            }
        };
        invocations.push(record);
        pad.add_observation(&observation);
        emitter
            .send(AgentStreamEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                output: observation.clone(),
                success,
            })
            .await;
        observation
    }

    /// One retrieval before the first step, when enabled.
    async fn prefetch(&self, input: &TurnInput, emitter: &Emitter) -> Vec<ScoredChunk> {
        if !self.settings.prefetch_context || !input.flags.rag_enabled {
            return Vec::new();
        }
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        match retriever
            .retrieve(&input.user.content, &input.session_id, self.settings.retrieval_k)
            .await
        {
            Ok(hits) => {
                if !hits.is_empty() {
                    emitter
                        .send(AgentStreamEvent::Retrieval {
                            hits: hits.len(),
                            sources: unique_sources(hits.iter().map(|h| h.chunk.source.as_str())),
                        })
                        .await;
                }
                hits
            }
            Err(e) => {
                warn!(session_id = %input.session_id, error = %e, "Context prefetch failed, continuing without it");
                Vec::new()
            }
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Wait before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn tool_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn allowed(kind: ToolKind, flags: SessionFlags) -> bool {
    match kind {
        ToolKind::Action => flags.tools_enabled,
        ToolKind::Retrieval => flags.rag_enabled,
    }
}

/// What a stopped turn had said so far.
fn partial_answer(pad: &Scratchpad) -> String {
    pad.last_thought().unwrap_or_default().to_string()
}

fn retrieval_event(data: Option<&serde_json::Value>) -> AgentStreamEvent {
    let hits = data.and_then(|d| d.as_array()).map(Vec::as_slice).unwrap_or_default();
    AgentStreamEvent::Retrieval {
        hits: hits.len(),
        sources: unique_sources(hits.iter().filter_map(|h| h["source"].as_str())),
    }
}

fn unique_sources<'a>(sources: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for source in sources {
        if !out.iter().any(|s| s == source) {
            out.push(source.to_string());
        }
    }
    out
}

/// Optional stream sink; a dropped receiver is ignored.
struct Emitter(Option<mpsc::Sender<AgentStreamEvent>>);

impl Emitter {
    async fn send(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use parley_config::ToolSettings;
    use parley_core::error::ProviderError;
    use parley_core::message::ImageRef;
    use parley_core::{ErrorKind, Role};

    fn input(text: &str, flags: SessionFlags) -> TurnInput {
        TurnInput {
            session_id: SessionId::from("s1"),
            history: Vec::new(),
            user: Message::user(text),
            flags,
            documents: Vec::new(),
        }
    }

    fn settings(max_steps: u32) -> LoopSettings {
        LoopSettings {
            max_steps,
            ..LoopSettings::default()
        }
    }

    fn builtin_tools() -> Arc<ToolRegistry> {
        Arc::new(parley_tools::default_registry(&ToolSettings::default()))
    }

    #[tokio::test]
    async fn calculator_scenario_answers_with_four() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call(
                "calculator",
                serde_json::json!({"a": 2, "b": 2, "op": "+"}),
            )],
            "I'll add the numbers",
            "2 + 2 = 4",
        ));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(8));

        let outcome = agent
            .run(input("2+2?", SessionFlags::default()), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Done);
        assert!(outcome.answer.contains('4'));
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.tool_invocations.len(), 1);
        assert_eq!(outcome.tool_invocations[0].output.as_deref(), Some("4"));

        // The second request carries the tool result back to the model.
        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_calculator"));
        assert_eq!(last.content, "4");
    }

    #[tokio::test]
    async fn step_budget_aborts_with_best_effort_answer() {
        let looping = make_tool_call_response(
            vec![make_tool_call("current_time", serde_json::json!({}))],
            "Checking the time again",
        );
        let provider = Arc::new(SequentialMockProvider::new(vec![looping; 3]));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(3));

        let outcome = agent
            .run(input("loop forever", SessionFlags::default()), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Aborted);
        assert!(outcome.budget_exceeded());
        assert!(!outcome.answer.trim().is_empty());
        assert_eq!(outcome.steps, 3);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn disabled_rag_never_retrieves() {
        let tool = Arc::new(RecordingTool::new("knowledge_search", ToolKind::Retrieval));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SharedTool(tool.clone())));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("knowledge_search", serde_json::json!({"query": "x"}))],
            "",
            "Answered without documents",
        ));
        let agent = ReasoningLoop::new(provider.clone(), Arc::new(registry), settings(4));
        let flags = SessionFlags {
            tools_enabled: true,
            rag_enabled: false,
        };

        let outcome = agent
            .run(input("what does my file say?", flags), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Done);
        assert_eq!(tool.call_count(), 0);
        assert!(outcome.tool_invocations.is_empty());
        assert!(provider.requests()[0].tools.is_empty());
        let observation = provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(observation.contains("not available"));
    }

    #[tokio::test]
    async fn disabled_tools_are_not_offered() {
        let provider = Arc::new(SequentialMockProvider::single_text("Four."));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(4));
        let flags = SessionFlags {
            tools_enabled: false,
            rag_enabled: true,
        };
        agent
            .run(input("2+2?", flags), CancellationToken::new(), None)
            .await
            .unwrap();
        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert!(request.messages[0].content.contains("No tools are available"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_is_retried_then_observed() {
        let tool = Arc::new(RecordingTool::new("slow", ToolKind::Action).slow(Duration::from_secs(60)));
        let mut registry = ToolRegistry::new().with_call_timeout(Duration::from_secs(1));
        registry.register(Box::new(SharedTool(tool.clone())));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("slow", serde_json::json!({}))],
            "",
            "The tool was too slow, sorry.",
        ));
        let mut s = settings(4);
        s.tool_retries = 1;
        let agent = ReasoningLoop::new(provider.clone(), Arc::new(registry), s);

        let outcome = agent
            .run(input("go", SessionFlags::default()), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Done);
        assert_eq!(tool.call_count(), 2);
        assert!(!outcome.tool_invocations[0].succeeded());
        let observation = provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(observation.contains("timed out"));
    }

    #[tokio::test]
    async fn exhausted_model_surfaces_model_unavailable() {
        let provider = Arc::new(FailingProvider(ProviderError::Exhausted {
            attempts: 4,
            last_error: "rate limited".into(),
        }));
        let agent = ReasoningLoop::new(provider, builtin_tools(), settings(4));
        let (tx, mut rx) = mpsc::channel(16);

        let err = agent
            .run(input("hi", SessionFlags::default()), CancellationToken::new(), Some(tx))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        match rx.recv().await.unwrap() {
            AgentStreamEvent::Error { kind, .. } => assert_eq!(kind, "model_unavailable"),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_model_call() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::new()));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(4));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = agent
            .run(input("hi", SessionFlags::default()), cancel, None)
            .await
            .unwrap();
        assert_eq!(outcome.state, LoopState::Cancelled);
        assert!(outcome.answer.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn tool_backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(tool_backoff(base, 1), base);
        assert_eq!(tool_backoff(base, 3), Duration::from_millis(400));
        assert_eq!(tool_backoff(base, 40), base * u32::MAX);
        assert_eq!(tool_backoff(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
    }

    #[tokio::test]
    async fn stop_between_steps_keeps_partial_and_skips_tool() {
        let cancel = CancellationToken::new();
        let tool = Arc::new(RecordingTool::new("lookup", ToolKind::Action));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SharedTool(tool.clone())));
        let provider = Arc::new(
            SequentialMockProvider::tool_then_answer(
                vec![make_tool_call("lookup", serde_json::json!({}))],
                "Working on it",
                "never reached",
            )
            .cancelling(cancel.clone()),
        );
        let agent = ReasoningLoop::new(provider.clone(), Arc::new(registry), settings(4));

        let outcome = agent
            .run(input("go", SessionFlags::default()), cancel, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Cancelled);
        assert_eq!(outcome.answer, "Working on it");
        assert_eq!(tool.call_count(), 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn text_format_action_is_executed() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(
                "Thought: use the calculator\nAction: calculator\nAction Input: {\"expression\": \"6*7\"}",
            ),
            make_text_response("Final Answer: 42"),
        ]));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(4));

        let outcome = agent
            .run(input("6 times 7", SessionFlags::default()), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.answer, "42");
        assert_eq!(outcome.tool_invocations[0].output.as_deref(), Some("42"));
        let feedback = provider.requests()[1].messages.last().unwrap().clone();
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.starts_with("Observation from calculator"));
    }

    #[tokio::test]
    async fn image_and_history_reach_the_model() {
        let provider = Arc::new(SequentialMockProvider::single_text("A cat."));
        let agent = ReasoningLoop::new(provider.clone(), builtin_tools(), settings(2));
        let mut turn = input("what is this?", SessionFlags::default());
        turn.history = vec![Message::user("hello"), Message::assistant("hi there")];
        turn.user = turn.user.with_image(ImageRef::from_bytes("image/png", b"png"));
        turn.documents = vec!["manual.pdf".into()];

        agent.run(turn, CancellationToken::new(), None).await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 4);
        assert!(request.messages[0].content.contains("manual.pdf"));
        assert_eq!(request.messages[1].content, "hello");
        assert_eq!(request.messages[3].images.len(), 1);
    }

    #[tokio::test]
    async fn stream_reports_the_whole_turn() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call(
                "calculator",
                serde_json::json!({"a": 2, "b": 2, "op": "+"}),
            )],
            "Adding",
            "4",
        ));
        let events = Arc::new(EventBus::default());
        let mut bus = events.subscribe();
        let agent =
            ReasoningLoop::new(provider, builtin_tools(), settings(4)).with_events(events.clone());
        let (tx, mut rx) = mpsc::channel(32);

        agent
            .run(input("2+2?", SessionFlags::default()), CancellationToken::new(), Some(tx))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["thought", "tool_call", "tool_result", "answer", "done"]);

        let mut saw_turn = false;
        while let Ok(event) = bus.try_recv() {
            if let DomainEvent::TurnCompleted { state, steps, .. } = event.as_ref() {
                assert_eq!(state, "done");
                assert_eq!(*steps, 2);
                saw_turn = true;
            }
        }
        assert!(saw_turn);
    }
}
