//! Document chunks and the vector store contract.
//!
//! Chunks live in namespaces: one per session knowledge base, plus a shared
//! `global` namespace. A namespace is bound to exactly one
//! [`EmbeddingVersion`] from its first upsert until it is deleted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingVersion;
use crate::error::VectorStoreError;
use crate::message::SessionId;

/// Namespace shared by every session.
pub const GLOBAL_NAMESPACE: &str = "global";

/// Namespace holding one session's uploaded documents.
pub fn session_namespace(session_id: &SessionId) -> String {
    format!("session:{session_id}")
}

/// A bounded piece of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `{document_id}:{ordinal}`
    pub id: String,
    /// Content hash of the source document.
    pub document_id: String,
    /// Knowledge-base namespace (session or global).
    pub namespace: String,
    /// File name the document was uploaded as.
    pub source: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Position of this chunk within its document.
    pub ordinal: usize,
}

/// A chunk with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Summary of one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub chunks: usize,
    pub documents: usize,
    pub version: EmbeddingVersion,
}

/// Namespaced chunk index.
///
/// Writes to one namespace are serialized; queries may run concurrently.
/// Chunks returned by `upsert` are queryable as soon as it returns.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace chunks (matched by id). Every chunk must carry a
    /// non-empty embedding of `version.dimensions` floats.
    async fn upsert(
        &self,
        namespace: &str,
        version: &EmbeddingVersion,
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize, VectorStoreError>;

    /// Top-`k` chunks by cosine similarity, best first; ties keep insertion order.
    ///
    /// An unknown or empty namespace yields an empty list. A namespace built
    /// with a different embedding version is an error.
    async fn query(
        &self,
        namespace: &str,
        version: &EmbeddingVersion,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    async fn namespace_version(
        &self,
        namespace: &str,
    ) -> Result<Option<EmbeddingVersion>, VectorStoreError>;

    /// Drop a whole namespace. Returns the number of chunks removed.
    async fn delete_namespace(&self, namespace: &str) -> Result<usize, VectorStoreError>;

    /// Drop one document's chunks from a namespace.
    async fn delete_document(
        &self,
        namespace: &str,
        document_id: &str,
    ) -> Result<usize, VectorStoreError> {
        self.prune_document(namespace, document_id, 0).await
    }

    /// Drop the chunks of a document whose ordinal is `keep` or higher.
    /// A namespace left empty is removed.
    async fn prune_document(
        &self,
        namespace: &str,
        document_id: &str,
        keep: usize,
    ) -> Result<usize, VectorStoreError>;

    async fn count(&self, namespace: &str) -> Result<usize, VectorStoreError>;

    async fn stats(&self) -> Result<Vec<NamespaceStats>, VectorStoreError>;
}

/// Check a batch against the namespace's version before it is written.
pub fn validate_batch(
    namespace: &str,
    bound: Option<&EmbeddingVersion>,
    version: &EmbeddingVersion,
    chunks: &[DocumentChunk],
) -> Result<(), VectorStoreError> {
    if let Some(existing) = bound {
        if existing != version {
            return Err(VectorStoreError::EmbeddingVersionMismatch {
                namespace: namespace.to_string(),
                expected: existing.to_string(),
                found: version.to_string(),
            });
        }
    }
    for chunk in chunks {
        if chunk.embedding.is_empty() || chunk.embedding.len() != version.dimensions {
            return Err(VectorStoreError::InvalidEmbedding {
                chunk_id: chunk.id.clone(),
            });
        }
    }
    Ok(())
}
