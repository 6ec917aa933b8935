//! In-memory stores — useful for testing and ephemeral sessions.

use crate::index::NamespaceIndex;
use crate::record::SessionRecord;
use async_trait::async_trait;
use chrono::Utc;
use parley_core::document::{validate_batch, DocumentChunk, NamespaceStats, ScoredChunk, VectorStore};
use parley_core::embedding::EmbeddingVersion;
use parley_core::error::{StoreError, VectorStoreError};
use parley_core::message::{Message, SessionId};
use parley_core::session::{sort_newest_first, SessionFlags, SessionMeta, SessionStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// A session store that keeps everything in a map.
///
/// "Durable" here means "visible to every later call"; nothing survives the
/// process. [`fail_writes`](Self::fail_writes) simulates a broken disk.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    tombstones: Arc<RwLock<HashSet<SessionId>>>,
    failing: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tombstones: Arc::new(RwLock::new(HashSet::new())),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with a storage error.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("simulated write failure".into()));
        }
        Ok(())
    }

    async fn update_meta<F>(&self, session_id: &SessionId, f: F) -> Result<SessionMeta, StoreError>
    where
        F: FnOnce(&mut SessionMeta) + Send,
    {
        self.check_writable()?;
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        f(&mut record.meta);
        record.meta.updated_at = Utc::now();
        Ok(record.meta.clone())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, meta: SessionMeta) -> Result<SessionMeta, StoreError> {
        self.check_writable()?;
        if self.tombstones.read().await.contains(&meta.id) {
            return Err(StoreError::SessionDeleted(meta.id.to_string()));
        }
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(meta.id.clone())
            .or_insert_with(|| SessionRecord::new(meta));
        Ok(record.meta.clone())
    }

    async fn append(&self, session_id: &SessionId, message: Message) -> Result<Message, StoreError> {
        self.check_writable()?;
        // Tombstone check and insert happen under the sessions write lock,
        // and delete takes the same lock before tombstoning.
        let mut sessions = self.sessions.write().await;
        if self.tombstones.read().await.contains(session_id) {
            return Err(StoreError::SessionDeleted(session_id.to_string()));
        }
        let record = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionRecord::implicit(session_id));
        Ok(record.push(message))
    }

    async fn get(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        if self.tombstones.read().await.contains(session_id) {
            return Err(StoreError::SessionDeleted(session_id.to_string()));
        }
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).map(|r| r.meta.clone()))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut sessions = self.sessions.write().await;
        self.tombstones.write().await.insert(session_id.clone());
        Ok(sessions.remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let mut metas: Vec<SessionMeta> =
            self.sessions.read().await.values().map(|r| r.meta.clone()).collect();
        sort_newest_first(&mut metas);
        Ok(metas)
    }

    async fn rename(&self, session_id: &SessionId, title: &str) -> Result<SessionMeta, StoreError> {
        let title = title.to_string();
        self.update_meta(session_id, move |m| m.title = title).await
    }

    async fn set_flags(
        &self,
        session_id: &SessionId,
        flags: SessionFlags,
    ) -> Result<SessionMeta, StoreError> {
        self.update_meta(session_id, move |m| m.flags = flags).await
    }

    async fn add_document(&self, session_id: &SessionId, name: &str) -> Result<SessionMeta, StoreError> {
        let name = name.to_string();
        self.update_meta(session_id, move |m| m.push_document(&name)).await
    }

    async fn is_deleted(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.tombstones.read().await.contains(session_id))
    }
}

/// A vector store that keeps every namespace in memory.
pub struct InMemoryVectorStore {
    namespaces: Arc<RwLock<BTreeMap<String, NamespaceIndex>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            namespaces: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(
        &self,
        namespace: &str,
        version: &EmbeddingVersion,
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize, VectorStoreError> {
        let mut namespaces = self.namespaces.write().await;
        validate_batch(namespace, namespaces.get(namespace).map(|n| &n.version), version, &chunks)?;
        let index = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| NamespaceIndex::new(version.clone()));
        Ok(index.upsert(chunks))
    }

    async fn query(
        &self,
        namespace: &str,
        version: &EmbeddingVersion,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let namespaces = self.namespaces.read().await;
        let Some(index) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        if &index.version != version {
            return Err(VectorStoreError::EmbeddingVersionMismatch {
                namespace: namespace.to_string(),
                expected: index.version.to_string(),
                found: version.to_string(),
            });
        }
        Ok(index.query(embedding, k))
    }

    async fn namespace_version(
        &self,
        namespace: &str,
    ) -> Result<Option<EmbeddingVersion>, VectorStoreError> {
        Ok(self.namespaces.read().await.get(namespace).map(|n| n.version.clone()))
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<usize, VectorStoreError> {
        Ok(self
            .namespaces
            .write()
            .await
            .remove(namespace)
            .map_or(0, |n| n.chunks.len()))
    }

    async fn prune_document(
        &self,
        namespace: &str,
        document_id: &str,
        keep: usize,
    ) -> Result<usize, VectorStoreError> {
        let mut namespaces = self.namespaces.write().await;
        let Some(index) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let removed = index.prune_document(document_id, keep);
        if index.chunks.is_empty() {
            namespaces.remove(namespace);
        }
        Ok(removed)
    }

    async fn count(&self, namespace: &str) -> Result<usize, VectorStoreError> {
        Ok(self.namespaces.read().await.get(namespace).map_or(0, |n| n.chunks.len()))
    }

    async fn stats(&self) -> Result<Vec<NamespaceStats>, VectorStoreError> {
        Ok(self
            .namespaces
            .read()
            .await
            .iter()
            .map(|(name, index)| index.stats(name))
            .collect())
    }
}
