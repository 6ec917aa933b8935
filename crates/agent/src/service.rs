//! `ChatService` — the boundary the UI talks to.
//!
//! It owns the order of side effects for every user action:
//!
//! - a turn persists the user message, runs the loop, then persists the
//!   assistant message; a failed durable write fails the turn
//! - a stopped turn persists its partial answer with a truncation marker, or
//!   nothing when no text was produced
//! - a delete goes to the store first, then the local history, then the
//!   session's knowledge base
//! - uploads and deletes of one session never interleave, so a delete cannot
//!   land between an upload's embedding and its vector write

use chrono::Utc;
use parley_config::AppConfig;
use parley_core::document::{NamespaceStats, VectorStore, GLOBAL_NAMESPACE, session_namespace};
use parley_core::error::{Error, IngestError, StoreError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::keyed_lock::KeyedLocks;
use parley_core::message::{ImageRef, Message, SessionId};
use parley_core::provider::Provider;
use parley_core::session::{SessionFlags, SessionMeta, SessionStore, title_from_text};
use parley_history::{CachedSession, HistorySync, SyncReport};
use parley_knowledge::{DirectoryLoad, DocumentIngestor, Retriever, mime_from_path};
use parley_memory::{FileSessionStore, FileVectorStore, InMemoryVectorStore, SqliteSessionStore};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::reasoning::{LoopSettings, LoopState, ReasoningLoop, TurnInput};
use crate::scheduler::TurnScheduler;
use crate::stream_event::AgentStreamEvent;

/// Appended to an answer the user stopped.
pub const STOPPED_MARKER: &str = "[generation stopped]";

/// File the local history cache lives in, under the data directory.
pub const HISTORY_CACHE_FILE: &str = "history.json";

/// Everything a [`ChatService`] is assembled from.
pub struct ServiceParts {
    pub store: Arc<dyn SessionStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub history: Arc<HistorySync>,
    pub reasoning: Arc<ReasoningLoop>,
    pub ingestor: Arc<DocumentIngestor>,
    pub defaults: SessionFlags,
    pub events: Arc<EventBus>,
}

/// Result of one user turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub session_id: SessionId,
    /// The stored user message, ordinal assigned
    pub user: Message,
    /// The stored assistant message; `None` when a stop left nothing to keep
    pub assistant: Option<Message>,
    pub state: LoopState,
    pub steps: u32,
    /// Session title after this turn
    pub title: String,
}

impl TurnReply {
    pub fn answer(&self) -> &str {
        self.assistant.as_ref().map_or("", |m| m.content.as_str())
    }
}

pub struct ChatService {
    store: Arc<dyn SessionStore>,
    vectors: Arc<dyn VectorStore>,
    history: Arc<HistorySync>,
    reasoning: Arc<ReasoningLoop>,
    ingestor: Arc<DocumentIngestor>,
    scheduler: TurnScheduler,
    /// Held by `upload` and `delete` for the session they touch.
    knowledge_locks: KeyedLocks<SessionId>,
    defaults: SessionFlags,
    events: Arc<EventBus>,
}

impl ChatService {
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            store: parts.store,
            vectors: parts.vectors,
            history: parts.history,
            reasoning: parts.reasoning,
            ingestor: parts.ingestor,
            scheduler: TurnScheduler::new(),
            knowledge_locks: KeyedLocks::new(),
            defaults: parts.defaults,
            events: parts.events,
        }
    }

    /// Build the full stack from configuration around `provider`.
    ///
    /// Opens the configured stores under the data directory and reconciles
    /// the local history cache against the session store before returning.
    pub async fn from_config(config: &AppConfig, provider: Arc<dyn Provider>) -> Result<Self, Error> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            StoreError::Storage(format!("cannot create {}: {e}", data_dir.display()))
        })?;
        let events = Arc::new(EventBus::default());

        let store: Arc<dyn SessionStore> = match config.storage.session_backend.as_str() {
            "sqlite" => {
                let url = format!("sqlite://{}", data_dir.join("sessions.db").display());
                Arc::new(SqliteSessionStore::new(&url).await?)
            }
            _ => Arc::new(FileSessionStore::open(&data_dir)?),
        };
        let vectors: Arc<dyn VectorStore> = match config.storage.vector_backend.as_str() {
            "memory" => Arc::new(InMemoryVectorStore::new()),
            _ => Arc::new(FileVectorStore::open(&data_dir)?),
        };

        let embedder = parley_providers::build_embedder(config, provider.clone());
        let retriever = Arc::new(
            Retriever::new(embedder.clone(), vectors.clone(), &config.retrieval)
                .with_events(events.clone()),
        );
        let mut tools = parley_tools::default_registry(&config.tools);
        parley_tools::register_knowledge(&mut tools, retriever.clone(), config.retrieval.top_k);

        let reasoning = ReasoningLoop::new(provider, Arc::new(tools), LoopSettings::from_config(config))
            .with_retriever(retriever)
            .with_events(events.clone());
        let ingestor = DocumentIngestor::new(embedder, vectors.clone(), &config.ingest)
            .with_events(events.clone());
        let history = HistorySync::startup(
            store.clone(),
            Some(data_dir.join(HISTORY_CACHE_FILE)),
            Some(events.clone()),
        )
        .await?;

        info!(
            data_dir = %data_dir.display(),
            sessions = store.name(),
            vectors = vectors.name(),
            "Chat service ready"
        );
        Ok(Self::new(ServiceParts {
            store,
            vectors,
            history: Arc::new(history),
            reasoning: Arc::new(reasoning),
            ingestor: Arc::new(ingestor),
            defaults: config.sessions.flags(),
            events,
        }))
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Start an empty conversation with the default flags.
    pub async fn new_session(&self) -> Result<SessionMeta, Error> {
        let meta = self
            .store
            .create(SessionMeta::new(SessionId::new(), self.defaults))
            .await?;
        self.history.record(&meta).await;
        self.events.publish(DomainEvent::SessionCreated {
            session_id: meta.id.to_string(),
            timestamp: Utc::now(),
        });
        info!(session_id = %meta.id, "Session created");
        Ok(meta)
    }

    /// Run one user turn. Turns on the same session queue behind each other.
    pub async fn send_turn(
        &self,
        session_id: &SessionId,
        text: &str,
        image: Option<ImageRef>,
        stream: Option<mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnReply, Error> {
        let permit = self.scheduler.acquire(session_id).await;
        let mut meta = self.ensure_session(session_id).await?;
        let history = self.store.get(session_id).await?;

        let mut user = Message::user(text);
        if let Some(image) = image {
            user = user.with_image(image);
        }
        let user = self.store.append(session_id, user).await.inspect_err(|e| {
            warn!(session_id = %session_id, error = %e, "User message not saved");
        })?;

        if meta.has_default_title() {
            if let Some(title) = title_from_text(text) {
                match self.store.rename(session_id, &title).await {
                    Ok(renamed) => meta = renamed,
                    Err(e) => warn!(session_id = %session_id, error = %e, "Automatic title not saved"),
                }
            }
        }

        let input = TurnInput {
            session_id: session_id.clone(),
            history,
            user: user.clone(),
            flags: meta.flags,
            documents: meta.documents.clone(),
        };
        let outcome = match self.reasoning.run(input, permit.token(), stream).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.refresh(session_id).await;
                return Err(e);
            }
        };

        let reply = match outcome.state {
            LoopState::Cancelled if outcome.answer.trim().is_empty() => None,
            LoopState::Cancelled => Some(
                Message::assistant(format!("{}\n\n{STOPPED_MARKER}", outcome.answer.trim_end()))
                    .with_tool_invocations(outcome.tool_invocations)
                    .mark_truncated(),
            ),
            _ => Some(Message::assistant(outcome.answer).with_tool_invocations(outcome.tool_invocations)),
        };
        let assistant = match reply {
            Some(message) => Some(self.store.append(session_id, message).await.inspect_err(|e| {
                warn!(session_id = %session_id, error = %e, "Assistant message not saved");
            })?),
            None => None,
        };

        let title = self
            .refresh(session_id)
            .await
            .map_or(meta.title, |m| m.title);
        Ok(TurnReply {
            session_id: session_id.clone(),
            user,
            assistant,
            state: outcome.state,
            steps: outcome.steps,
            title,
        })
    }

    /// Stop the running turn of `session_id` at its next step boundary.
    pub fn stop(&self, session_id: &SessionId) -> bool {
        self.scheduler.stop(session_id)
    }

    pub fn is_generating(&self, session_id: &SessionId) -> bool {
        self.scheduler.is_running(session_id)
    }

    /// Ingest a file into the session's knowledge base. Returns the chunk count.
    ///
    /// `mime_type` defaults to a guess from the file name.
    pub async fn upload(
        &self,
        session_id: &SessionId,
        file_name: &str,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<usize, Error> {
        let mime = resolve_mime(file_name, mime_type)?;
        let _guard = self.knowledge_locks.lock(session_id).await;
        self.ensure_session(session_id).await?;
        let chunks = self
            .ingestor
            .ingest_named(bytes, &mime, &session_namespace(session_id), file_name)
            .await?;
        let meta = self.store.add_document(session_id, file_name).await?;
        self.history.record(&meta).await;
        Ok(chunks.len())
    }

    /// Ingest a file into the shared knowledge base.
    pub async fn upload_global(
        &self,
        file_name: &str,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<usize, Error> {
        let mime = resolve_mime(file_name, mime_type)?;
        let chunks = self
            .ingestor
            .ingest_named(bytes, &mime, GLOBAL_NAMESPACE, file_name)
            .await?;
        Ok(chunks.len())
    }

    /// Load a folder of shared documents into the global knowledge base.
    pub async fn load_knowledge_dir(&self, dir: &Path) -> Result<DirectoryLoad, Error> {
        self.ingestor.ingest_dir(dir, GLOBAL_NAMESPACE).await
    }

    /// Drop one document's chunks from a knowledge-base namespace.
    pub async fn remove_document(&self, namespace: &str, document_id: &str) -> Result<usize, Error> {
        self.ingestor.remove_document(namespace, document_id).await
    }

    /// Resume a session: returns its full stored history.
    pub async fn switch_to(&self, session_id: &SessionId) -> Result<Vec<Message>, Error> {
        self.history.switch_to(session_id).await
    }

    /// Retitle a session. A blank title leaves it unchanged.
    pub async fn rename(&self, session_id: &SessionId, title: &str) -> Result<SessionMeta, Error> {
        let title = title.trim();
        if title.is_empty() {
            return self
                .store
                .meta(session_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(session_id.to_string()).into());
        }
        let meta = self.history.rename(session_id, title).await?;
        self.events.publish(DomainEvent::SessionRenamed {
            session_id: session_id.to_string(),
            title: meta.title.clone(),
            timestamp: Utc::now(),
        });
        Ok(meta)
    }

    /// Delete a session everywhere. Any running turn is stopped first.
    pub async fn delete(&self, session_id: &SessionId) -> Result<bool, Error> {
        self.scheduler.stop(session_id);
        let _guard = self.knowledge_locks.lock(session_id).await;
        let existed = self.history.delete(session_id).await?;
        let chunks_removed = match self.vectors.delete_namespace(&session_namespace(session_id)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Knowledge base of deleted session not removed");
                0
            }
        };
        self.events.publish(DomainEvent::SessionDeleted {
            session_id: session_id.to_string(),
            chunks_removed,
            timestamp: Utc::now(),
        });
        info!(session_id = %session_id, existed, chunks_removed, "Session deleted");
        Ok(existed)
    }

    /// Session list for the sidebar, served from the local cache.
    pub async fn list_sessions(&self) -> Vec<CachedSession> {
        self.history.list().await
    }

    pub async fn active_session(&self) -> Option<SessionId> {
        self.history.active().await
    }

    pub async fn set_flags(&self, session_id: &SessionId, flags: SessionFlags) -> Result<SessionMeta, Error> {
        let meta = self.store.set_flags(session_id, flags).await?;
        self.history.record(&meta).await;
        Ok(meta)
    }

    pub async fn messages(&self, session_id: &SessionId) -> Result<Vec<Message>, Error> {
        Ok(self.store.get(session_id).await?)
    }

    pub async fn meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, Error> {
        Ok(self.store.meta(session_id).await?)
    }

    pub async fn reconcile(&self) -> Result<SyncReport, Error> {
        self.history.reconcile().await
    }

    /// What the reconcile at startup repaired.
    pub fn startup_report(&self) -> &SyncReport {
        self.history.startup_report()
    }

    pub async fn knowledge_stats(&self) -> Result<Vec<NamespaceStats>, Error> {
        Ok(self.vectors.stats().await?)
    }

    /// Existing metadata, or a fresh session under this id.
    async fn ensure_session(&self, session_id: &SessionId) -> Result<SessionMeta, Error> {
        if let Some(meta) = self.store.meta(session_id).await? {
            return Ok(meta);
        }
        if self.store.is_deleted(session_id).await? {
            return Err(StoreError::SessionDeleted(session_id.to_string()).into());
        }
        let meta = self
            .store
            .create(SessionMeta::new(session_id.clone(), self.defaults))
            .await?;
        self.history.record(&meta).await;
        self.events.publish(DomainEvent::SessionCreated {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(meta)
    }

    /// Mirror the store's current metadata into the local history.
    async fn refresh(&self, session_id: &SessionId) -> Option<SessionMeta> {
        match self.store.meta(session_id).await {
            Ok(Some(meta)) => {
                self.history.record(&meta).await;
                Some(meta)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not refresh session metadata");
                None
            }
        }
    }
}

fn resolve_mime(file_name: &str, mime_type: Option<&str>) -> Result<String, Error> {
    match mime_type {
        Some(mime) => Ok(mime.to_string()),
        None => mime_from_path(Path::new(file_name))
            .map(str::to_string)
            .ok_or_else(|| IngestError::UnsupportedFormat(file_name.to_string()).into()),
    }
}
