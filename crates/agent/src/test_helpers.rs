//! Scripted providers and tools shared by the agent tests.

use async_trait::async_trait;
use parley_core::embedding::{Embedder, EmbeddingVersion};
use parley_core::error::{ProviderError, ToolError};
use parley_core::provider::{
    ChatMessage, Provider, ProviderRequest, ProviderResponse, ToolCallRequest, Usage,
};
use parley_core::tool::{Tool, ToolContext, ToolKind, ToolResult};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returns scripted responses in order and records every request.
///
/// Panics if called more often than it has responses.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    /// Cancelled during the first call, to simulate a stop mid-turn
    cancel_on_call: Option<CancellationToken>,
    /// Simulated model latency per call
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            cancel_on_call: None,
            delay: None,
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn tool_then_answer(calls: Vec<ToolCallRequest>, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let responses = self.responses.lock().unwrap();
        match responses.get(call) {
            Some(response) => Ok(response.clone()),
            None => panic!(
                "SequentialMockProvider: no more responses (call #{call}, have {})",
                responses.len()
            ),
        }
    }
}

/// Always fails with the given error.
pub struct FailingProvider(pub ProviderError);

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(self.0.clone())
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    response(ChatMessage::assistant(text))
}

pub fn make_tool_call_response(calls: Vec<ToolCallRequest>, thought: &str) -> ProviderResponse {
    response(ChatMessage::assistant(thought).with_tool_calls(calls))
}

fn response(message: ChatMessage) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A tool that counts calls and optionally sleeps past any timeout.
pub struct RecordingTool {
    pub name: &'static str,
    pub kind: ToolKind,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl RecordingTool {
    pub fn new(name: &'static str, kind: ToolKind) -> Self {
        Self {
            name,
            kind,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Test tool"
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolResult::ok(format!("{} ran", self.name)))
    }
}

/// Lets a test keep a handle on a tool after the registry owns it.
pub struct SharedTool(pub std::sync::Arc<RecordingTool>);

#[async_trait]
impl Tool for SharedTool {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn kind(&self) -> ToolKind {
        self.0.kind()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        self.0.execute(arguments, ctx).await
    }
}

/// Wraps an embedder and sleeps before every batch, so a test can act while
/// an upload is still embedding.
pub struct SlowEmbedder<E> {
    pub inner: E,
    pub delay: Duration,
}

#[async_trait]
impl<E: Embedder> Embedder for SlowEmbedder<E> {
    fn version(&self) -> EmbeddingVersion {
        self.inner.version()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(texts).await
    }
}
