//! Document Ingestor: bytes in, queryable chunks out.

use crate::chunker::Chunker;
use crate::extract::{extract_text, is_supported, mime_from_path};
use chrono::Utc;
use parley_config::IngestConfig;
use parley_core::document::{session_namespace, DocumentChunk, VectorStore};
use parley_core::embedding::Embedder;
use parley_core::error::{Error, IngestError, VectorStoreError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::SessionId;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of loading a folder of documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryLoad {
    pub documents: usize,
    pub chunks: usize,
    /// Supported files that could not be read or ingested
    pub skipped: Vec<PathBuf>,
}

pub struct DocumentIngestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunker: Chunker,
    max_document_bytes: usize,
    events: Option<Arc<EventBus>>,
}

impl DocumentIngestor {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, config: &IngestConfig) -> Self {
        Self {
            embedder,
            store,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            max_document_bytes: config.max_document_bytes,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest into the knowledge base of `session_id`.
    ///
    /// When this returns, every chunk is already queryable.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        mime_type: &str,
        session_id: &SessionId,
    ) -> Result<Vec<DocumentChunk>, Error> {
        let source = format!("document-{}", document_id(bytes));
        self.ingest_named(bytes, mime_type, &session_namespace(session_id), &source)
            .await
    }

    /// Ingest into an explicit namespace, labelling chunks with `source`
    /// (usually the file name).
    ///
    /// Re-ingesting identical bytes into the same namespace replaces the
    /// previous chunks of that document. New chunks are written before stale
    /// ones are pruned, so a failed write leaves the old chunks in place.
    pub async fn ingest_named(
        &self,
        bytes: &[u8],
        mime_type: &str,
        namespace: &str,
        source: &str,
    ) -> Result<Vec<DocumentChunk>, Error> {
        if !is_supported(mime_type) {
            return Err(IngestError::UnsupportedFormat(mime_type.to_string()).into());
        }
        if bytes.len() > self.max_document_bytes {
            return Err(IngestError::TooLarge {
                size: bytes.len(),
                limit: self.max_document_bytes,
            }
            .into());
        }

        let version = self.embedder.version();
        if let Some(bound) = self.store.namespace_version(namespace).await? {
            if bound != version {
                return Err(VectorStoreError::EmbeddingVersionMismatch {
                    namespace: namespace.to_string(),
                    expected: bound.to_string(),
                    found: version.to_string(),
                }
                .into());
            }
        }

        let owned = bytes.to_vec();
        let mime = mime_type.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&owned, &mime))
            .await
            .map_err(|e| IngestError::Extraction(format!("extractor crashed: {e}")))??;

        let pieces = self.chunker.split(&text);
        if pieces.is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }

        let embeddings = self
            .embedder
            .embed(&pieces)
            .await
            .map_err(|e| IngestError::EmbeddingFailed(e.to_string()))?;
        if embeddings.len() != pieces.len() {
            return Err(IngestError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                pieces.len(),
                embeddings.len()
            ))
            .into());
        }

        let doc_id = document_id(bytes);
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| DocumentChunk {
                id: format!("{doc_id}:{ordinal}"),
                document_id: doc_id.clone(),
                namespace: namespace.to_string(),
                source: source.to_string(),
                text,
                embedding,
                ordinal,
            })
            .collect();

        self.store.upsert(namespace, &version, chunks.clone()).await?;
        let pruned = self.store.prune_document(namespace, &doc_id, chunks.len()).await?;
        if pruned > 0 {
            debug!(namespace, document = %doc_id, pruned, "Pruned chunks of an earlier ingest");
        }

        info!(namespace, source, chunks = chunks.len(), "Document ingested");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::DocumentIngested {
                namespace: namespace.to_string(),
                source: source.to_string(),
                chunks: chunks.len(),
                timestamp: Utc::now(),
            });
        }
        Ok(chunks)
    }

    /// Ingest every supported file under `dir` (recursively) into `namespace`.
    ///
    /// Files are labelled with their path relative to `dir`. A file that cannot
    /// be read or ingested is logged and skipped. A missing folder is created
    /// empty.
    pub async fn ingest_dir(&self, dir: &Path, namespace: &str) -> Result<DirectoryLoad, Error> {
        let mut load = DirectoryLoad::default();
        if !dir.exists() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %e, "Could not create knowledge folder");
            }
            return Ok(load);
        }

        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || supported_files(&root))
            .await
            .map_err(|e| IngestError::Extraction(format!("folder scan crashed: {e}")))?;

        for (path, mime) in files {
            let label = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable knowledge file");
                    load.skipped.push(path);
                    continue;
                }
            };
            match self.ingest_named(&bytes, mime, namespace, &label).await {
                Ok(chunks) => {
                    load.documents += 1;
                    load.chunks += chunks.len();
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping knowledge file");
                    load.skipped.push(path);
                }
            }
        }

        info!(
            dir = %dir.display(),
            namespace,
            documents = load.documents,
            chunks = load.chunks,
            skipped = load.skipped.len(),
            "Knowledge folder loaded"
        );
        Ok(load)
    }

    /// Remove one document's chunks from a namespace.
    pub async fn remove_document(&self, namespace: &str, document_id: &str) -> Result<usize, Error> {
        Ok(self.store.delete_document(namespace, document_id).await?)
    }
}

/// Supported files under `root`, sorted by path. Hidden entries are skipped.
fn supported_files(root: &Path) -> Vec<(PathBuf, &'static str)> {
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable knowledge folder entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let mime = mime_from_path(entry.path())?;
            Some((entry.into_path(), mime))
        })
        .collect();
    files.sort();
    files
}

/// Content-addressed id: the first 16 hex digits of the SHA-256 of the bytes.
pub fn document_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
