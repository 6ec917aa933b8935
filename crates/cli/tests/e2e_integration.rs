//! End-to-end integration tests for Parley.
//!
//! These tests drive the full stack from a user turn to persisted history:
//! the chat service, reasoning loop, tools, knowledge base, session stores
//! and the local history cache.

use std::path::Path;
use std::sync::Arc;

use parley_agent::{ChatService, LoopState};
use parley_config::AppConfig;
use parley_core::ErrorKind;
use parley_core::error::ProviderError;
use parley_core::event::DomainEvent;
use parley_core::message::{Message, Role, SessionId};
use parley_core::provider::{
    ChatMessage, Provider, ProviderRequest, ProviderResponse, ToolCallRequest, Usage,
};
use parley_core::session::{SessionFlags, SessionMeta, SessionStore};
use parley_knowledge::{DocumentIngestor, Retriever};
use parley_memory::{FileSessionStore, InMemorySessionStore, InMemoryVectorStore, SqliteSessionStore};
use parley_providers::HashEmbedder;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<ProviderResponse>>,
    requests: std::sync::Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn tool_then_text(tool_calls: Vec<ToolCallRequest>, thought: &str, answer: &str) -> Self {
        Self::new(vec![tool_response(tool_calls, thought), text_response(answer)])
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();
        if call >= responses.len() {
            panic!("ScriptedProvider exhausted: call #{call}, have {}", responses.len());
        }
        requests.push(request);
        Ok(responses[call].clone())
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: ChatMessage::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

fn tool_response(tool_calls: Vec<ToolCallRequest>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: ChatMessage::assistant(thought).with_tool_calls(tool_calls),
        usage: None,
        model: "mock".into(),
    }
}

fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.data_dir = Some(dir.to_path_buf());
    config
}

async fn service_with(config: &AppConfig, provider: Arc<ScriptedProvider>) -> ChatService {
    ChatService::from_config(config, provider)
        .await
        .expect("service should open")
}

const MANUAL: &str = "# Parley manual\n\n\
Parley stores every conversation as a session file in the data directory.\n\n\
Uploaded documents are split into overlapping chunks and indexed per session.\n\n\
The warranty covers the espresso machine for two years from purchase.";

// ── E2E: Conversation Scenario ───────────────────────────────────────────

#[tokio::test]
async fn e2e_calculator_turn_persists_user_and_assistant() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![make_tool_call("calculator", serde_json::json!({"a": 2, "b": 2, "op": "+"}))],
        "I should add these",
        "2 + 2 = 4",
    ));
    let service = service_with(&config_in(dir.path()), provider.clone()).await;
    let s1 = SessionId::from("s1");

    let reply = service.send_turn(&s1, "2+2?", None, None).await.unwrap();
    assert_eq!(reply.state, LoopState::Done);
    assert!(reply.answer().contains('4'));
    assert_eq!(provider.calls(), 2);

    // The tool result was fed back to the model as an observation.
    let second = &provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.role == Role::Tool && m.content == "4"));

    let messages = service.messages(&s1).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "2+2?");
    assert_eq!(messages[0].ordinal, 0);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].ordinal, 1);

    let invocation = &messages[1].tool_invocations[0];
    assert_eq!(invocation.tool_name, "calculator");
    assert_eq!(invocation.output.as_deref(), Some("4"));
}

#[tokio::test]
async fn e2e_turns_on_one_session_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let responses = (0..8).map(|i| text_response(&format!("reply {i}"))).collect();
    let provider = Arc::new(ScriptedProvider::new(responses));
    let service = Arc::new(service_with(&config_in(dir.path()), provider).await);
    let id = service.new_session().await.unwrap().id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            service.send_turn(&id, &format!("message {i}"), None, None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let messages = service.messages(&id).await.unwrap();
    assert_eq!(messages.len(), 16);
    let ordinals: Vec<u64> = messages.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, (0..16).collect::<Vec<u64>>());
    for pair in messages.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn e2e_step_budget_abort_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.agent.max_steps = 2;
    let call = || vec![make_tool_call("current_time", serde_json::json!({}))];
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(call(), "Checking the time"),
        tool_response(call(), "Checking again"),
    ]));
    let service = service_with(&config, provider.clone()).await;
    let id = service.new_session().await.unwrap().id;

    let reply = service.send_turn(&id, "what time is it?", None, None).await.unwrap();
    assert_eq!(reply.state, LoopState::Aborted);
    assert!(!reply.answer().trim().is_empty());
    assert_eq!(provider.calls(), 2);

    let stored = service.messages(&id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, reply.answer());
}

// ── E2E: Knowledge Base ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ingest_then_retrieve_finds_matching_chunk() {
    let config = AppConfig::default();
    let vectors = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new(config.embedding.dimensions));
    let ingestor = DocumentIngestor::new(embedder.clone(), vectors.clone(), &config.ingest);
    let retriever = Retriever::new(embedder, vectors, &config.retrieval);
    let session = SessionId::from("kb");

    assert!(retriever.retrieve("warranty", &session, 3).await.unwrap().is_empty());

    let chunks = ingestor
        .ingest(MANUAL.as_bytes(), "text/markdown", &session)
        .await
        .unwrap();
    assert!(!chunks.is_empty());

    let hits = retriever
        .retrieve("how many years does the warranty cover", &session, 3)
        .await
        .unwrap();
    assert!(!hits.is_empty() && hits.len() <= 3);
    assert!(hits.iter().any(|h| h.chunk.text.contains("warranty")));
    assert_eq!(hits[0].chunk.document_id, chunks[0].document_id);

    // Another session's knowledge base is unaffected.
    let other = SessionId::from("other");
    assert!(retriever.retrieve("warranty", &other, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_knowledge_search_grounds_the_answer() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![make_tool_call("knowledge_search", serde_json::json!({"query": "warranty years"}))],
        "The manual should say",
        "The warranty lasts two years (source: manual.md).",
    ));
    let service = service_with(&config_in(dir.path()), provider.clone()).await;
    let mut events = service.events().subscribe();
    let id = service.new_session().await.unwrap().id;
    service
        .upload(&id, "manual.md", MANUAL.as_bytes(), None)
        .await
        .unwrap();

    let reply = service.send_turn(&id, "How long is the warranty?", None, None).await.unwrap();
    assert_eq!(reply.state, LoopState::Done);

    // The uploaded file is named in the system prompt.
    let first = &provider.requests()[0];
    assert!(first.messages[0].content.contains("manual.md"));
    let observation = provider.requests()[1].messages.last().unwrap().content.clone();
    assert!(observation.contains("two years"));

    let assistant = reply.assistant.unwrap();
    assert_eq!(assistant.tool_invocations[0].tool_name, "knowledge_search");

    let mut retrievals = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.as_ref(), DomainEvent::RetrievalPerformed { .. }) {
            retrievals += 1;
        }
    }
    assert_eq!(retrievals, 1);
}

#[tokio::test]
async fn e2e_rag_disabled_session_never_retrieves() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![make_tool_call("knowledge_search", serde_json::json!({"query": "warranty"}))],
        "Let me look in the documents",
        "I can't check the documents here, but warranties are often two years.",
    ));
    let service = service_with(&config_in(dir.path()), provider.clone()).await;
    let mut events = service.events().subscribe();
    let id = service.new_session().await.unwrap().id;
    service
        .upload(&id, "manual.md", MANUAL.as_bytes(), None)
        .await
        .unwrap();
    service
        .set_flags(
            &id,
            SessionFlags {
                tools_enabled: true,
                rag_enabled: false,
            },
        )
        .await
        .unwrap();

    let reply = service.send_turn(&id, "How long is the warranty?", None, None).await.unwrap();
    assert_eq!(reply.state, LoopState::Done);
    assert!(reply.assistant.unwrap().tool_invocations.is_empty());

    for request in provider.requests() {
        assert!(request.tools.iter().all(|t| t.name != "knowledge_search"));
    }
    let observation = provider.requests()[1].messages.last().unwrap().content.clone();
    assert!(observation.contains("not available"));

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event.as_ref(), DomainEvent::RetrievalPerformed { .. }),
            "retrieval ran for a session with the knowledge base disabled"
        );
    }
}

// ── E2E: Session Lifecycle ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_deleted_session_stays_deleted_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let id = {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello!")]));
        let service = service_with(&config, provider).await;
        let id = service.new_session().await.unwrap().id;
        service.send_turn(&id, "hi", None, None).await.unwrap();
        service
            .upload(&id, "manual.md", MANUAL.as_bytes(), None)
            .await
            .unwrap();
        assert!(service.delete(&id).await.unwrap());
        id
    };

    let provider = Arc::new(ScriptedProvider::new(Vec::new()));
    let service = service_with(&config, provider.clone()).await;
    assert!(service.list_sessions().await.is_empty());
    assert!(service.startup_report().is_clean());
    assert!(service.knowledge_stats().await.unwrap().is_empty());

    let err = service.switch_to(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = service.send_turn(&id, "are you there?", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn e2e_titles_and_renames_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let id = {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("Sure.")]));
        let service = service_with(&config, provider).await;
        let id = service.new_session().await.unwrap().id;
        let reply = service
            .send_turn(&id, "Plan a weekend trip to the mountains please", None, None)
            .await
            .unwrap();
        assert_eq!(reply.title, "Plan a weekend trip");
        service.rename(&id, "Mountain trip").await.unwrap();
        id
    };

    let provider = Arc::new(ScriptedProvider::new(Vec::new()));
    let service = service_with(&config, provider).await;
    let listed = service.list_sessions().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].title, "Mountain trip");
    assert_eq!(listed[0].message_count, 2);
}

// ── E2E: Session Store Backends ──────────────────────────────────────────

async fn assert_round_trip(store: &dyn SessionStore) {
    let id = SessionId::from("round-trip");
    store
        .create(SessionMeta::new(id.clone(), SessionFlags::default()))
        .await
        .unwrap();
    store.append(&id, Message::user("first")).await.unwrap();
    let sent = store.append(&id, Message::assistant("second reply")).await.unwrap();

    let history = store.get(&id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.content, sent.content);
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.ordinal, 1);
    assert_eq!(last.tool_invocations, sent.tool_invocations, "{} changed the message", store.name());
}

#[tokio::test]
async fn e2e_append_then_get_round_trips_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();

    assert_round_trip(&InMemorySessionStore::new()).await;
    assert_round_trip(&FileSessionStore::open(dir.path().join("files")).unwrap()).await;

    let url = format!("sqlite://{}", dir.path().join("sessions.db").display());
    assert_round_trip(&SqliteSessionStore::new(&url).await.unwrap()).await;
}
