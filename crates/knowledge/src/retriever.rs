//! Retriever: top-k chunks of a session's knowledge base for a query.

use chrono::Utc;
use parley_config::RetrievalConfig;
use parley_core::document::{session_namespace, ScoredChunk, VectorStore, GLOBAL_NAMESPACE};
use parley_core::embedding::Embedder;
use parley_core::error::{Error, VectorStoreError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::SessionId;
use std::sync::Arc;
use tracing::debug;

/// A chunk plus its similarity to the query.
pub type RetrievedChunk = ScoredChunk;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    min_score: f32,
    include_global: bool,
    events: Option<Arc<EventBus>>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            min_score: config.min_score,
            include_global: config.include_global,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Up to `k` chunks, most relevant first.
    ///
    /// An empty knowledge base yields an empty list. Ties keep document order.
    /// A namespace indexed with another embedder fails with
    /// `EmbeddingVersionMismatch` instead of returning meaningless scores.
    pub async fn retrieve(
        &self,
        query: &str,
        session_id: &SessionId,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, Error> {
        let namespace = session_namespace(session_id);
        let mut namespaces = vec![namespace.as_str()];
        if self.include_global {
            namespaces.push(GLOBAL_NAMESPACE);
        }

        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let version = self.embedder.version();
        let mut populated = Vec::new();
        for ns in namespaces {
            if self.store.count(ns).await? == 0 {
                continue;
            }
            if let Some(bound) = self.store.namespace_version(ns).await? {
                if bound != version {
                    return Err(VectorStoreError::EmbeddingVersionMismatch {
                        namespace: ns.to_string(),
                        expected: bound.to_string(),
                        found: version.to_string(),
                    }
                    .into());
                }
            }
            populated.push(ns);
        }
        if populated.is_empty() {
            debug!(session = %session_id, "Knowledge base empty, skipping retrieval");
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed_one(query).await?;

        // Session chunks first so equal scores favour the session's own documents.
        let mut hits = Vec::new();
        for ns in &populated {
            let found = self.store.query(ns, &version, &embedding, k).await?;
            hits.extend(found.into_iter().filter(|h| h.score >= self.min_score));
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        debug!(session = %session_id, hits = hits.len(), k, "Retrieval complete");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::RetrievalPerformed {
                namespace,
                hits: hits.len(),
                timestamp: Utc::now(),
            });
        }
        Ok(hits)
    }
}
