//! Embedder trait — turns text into vectors.
//!
//! The same embedder must be used at ingest and query time. Every vector
//! carries the [`EmbeddingVersion`] that produced it so mixing two embedding
//! spaces is caught instead of silently returning garbage rankings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Identifies an embedding space: model name plus vector width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingVersion {
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingVersion {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions,
        }
    }
}

impl std::fmt::Display for EmbeddingVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.model, self.dimensions)
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn version(&self) -> EmbeddingVersion;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("embedder returned no vectors".into()))
    }
}
