//! File-based vector store: one JSON file per namespace.
//!
//! Every namespace lives in `vectors/<escaped namespace>.json` and is loaded
//! into memory when the store opens. Writes go through the atomic writer and
//! the cache changes only after the file is on disk.

use crate::atomic::{escape_file_name, read_json, remove_durable, remove_stale_temps, write_json};
use crate::index::NamespaceIndex;
use async_trait::async_trait;
use parley_core::document::{validate_batch, DocumentChunk, NamespaceStats, ScoredChunk, VectorStore};
use parley_core::embedding::EmbeddingVersion;
use parley_core::error::VectorStoreError;
use parley_core::keyed_lock::KeyedLocks;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct NamespaceFile {
    namespace: String,
    #[serde(flatten)]
    index: NamespaceIndex,
}

pub struct FileVectorStore {
    dir: PathBuf,
    namespaces: Arc<RwLock<BTreeMap<String, NamespaceIndex>>>,
    locks: KeyedLocks<String>,
}

impl FileVectorStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VectorStoreError> {
        let dir = root.into().join("vectors");
        std::fs::create_dir_all(&dir).map_err(storage)?;
        remove_stale_temps(&dir).map_err(storage)?;

        let mut namespaces = BTreeMap::new();
        for entry in std::fs::read_dir(&dir).map_err(storage)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<NamespaceFile>(&path) {
                Ok(Some(file)) => {
                    namespaces.insert(file.namespace, file.index);
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupted vector file"),
            }
        }

        debug!(dir = %dir.display(), namespaces = namespaces.len(), "File vector store loaded");
        Ok(Self {
            dir,
            namespaces: Arc::new(RwLock::new(namespaces)),
            locks: KeyedLocks::new(),
        })
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_file_name(namespace)))
    }

    async fn persist(&self, namespace: &str, index: &NamespaceIndex) -> Result<(), VectorStoreError> {
        let path = self.path_for(namespace);
        let file = NamespaceFile {
            namespace: namespace.to_string(),
            index: index.clone(),
        };
        tokio::task::spawn_blocking(move || write_json(&path, &file))
            .await
            .map_err(|e| VectorStoreError::Storage(e.to_string()))?
            .map_err(storage)
    }

    async fn remove_file(&self, namespace: &str) -> Result<(), VectorStoreError> {
        let path = self.path_for(namespace);
        tokio::task::spawn_blocking(move || remove_durable(&path))
            .await
            .map_err(|e| VectorStoreError::Storage(e.to_string()))?
            .map_err(storage)?;
        Ok(())
    }
}

fn storage(e: std::io::Error) -> VectorStoreError {
    VectorStoreError::Storage(e.to_string())
}

#[async_trait]
impl VectorStore for FileVectorStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(
        &self,
        namespace: &str,
        version: &EmbeddingVersion,
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize, VectorStoreError> {
        let _guard = self.locks.lock(&namespace.to_string()).await;
        let mut index = {
            let namespaces = self.namespaces.read().await;
            let current = namespaces.get(namespace);
            validate_batch(namespace, current.map(|n| &n.version), version, &chunks)?;
            current
                .cloned()
                .unwrap_or_else(|| NamespaceIndex::new(version.clone()))
        };
        let written = index.upsert(chunks);
        self.persist(namespace, &index).await?;
        self.namespaces.write().await.insert(namespace.to_string(), index);
        debug!(namespace, written, "Chunks upserted");
        Ok(written)
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
        let _guard = self.locks.lock(&namespace.to_string()).await;
        self.remove_file(namespace).await?;
        let removed = self
            .namespaces
            .write()
            .await
            .remove(namespace)
            .map_or(0, |n| n.chunks.len());
        Ok(removed)
    }

    async fn prune_document(
        &self,
        namespace: &str,
        document_id: &str,
        keep: usize,
    ) -> Result<usize, VectorStoreError> {
        let _guard = self.locks.lock(&namespace.to_string()).await;
        let Some(mut index) = self.namespaces.read().await.get(namespace).cloned() else {
            return Ok(0);
        };
        let removed = index.prune_document(document_id, keep);
        if removed == 0 {
            return Ok(0);
        }
        if index.chunks.is_empty() {
            self.remove_file(namespace).await?;
            self.namespaces.write().await.remove(namespace);
        } else {
            self.persist(namespace, &index).await?;
            self.namespaces.write().await.insert(namespace.to_string(), index);
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
