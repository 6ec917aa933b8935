//! Embedders: an offline feature-hashing embedder and one backed by the
//! provider's `/embeddings` endpoint.

use async_trait::async_trait;
use parley_core::embedding::{Embedder, EmbeddingVersion};
use parley_core::error::ProviderError;
use parley_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::debug;

/// Model name recorded for vectors made by [`HashEmbedder`].
pub const HASH_EMBEDDER_MODEL: &str = "hash-v1";

/// Deterministic bag-of-words embedder using the hashing trick.
///
/// Latin text is split into lowercase alphanumeric words; CJK text
/// contributes each character and each adjacent character pair. Every token
/// lands in one of `dimensions` signed buckets and the result is
/// L2-normalized. Needs no network, so it is the default and the test
/// embedder.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn version(&self) -> EmbeddingVersion {
        EmbeddingVersion::new(HASH_EMBEDDER_MODEL, self.dimensions)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // kana
        | 0x3400..=0x4DBF    // CJK ext A
        | 0x4E00..=0x9FFF    // CJK unified
        | 0xAC00..=0xD7AF    // hangul
        | 0xF900..=0xFAFF)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
            if let Some(p) = prev_cjk {
                tokens.push(format!("{p}{c}"));
            }
            prev_cjk = Some(c);
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
            prev_cjk = None;
        } else {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            prev_cjk = None;
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

/// 64-bit FNV-1a; stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Embedder backed by a provider's embedding endpoint, batched.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl ProviderEmbedder {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        dimensions: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn version(&self) -> EmbeddingVersion {
        EmbeddingVersion::new(self.model.clone(), self.dimensions)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "Embedding batch");
            let response = self
                .provider
                .embed(EmbeddingRequest {
                    model: self.model.clone(),
                    inputs: batch.to_vec(),
                })
                .await?;
            if response.embeddings.len() != batch.len() {
                return Err(ProviderError::InvalidResponse(format!(
                    "asked for {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }
            if let Some(bad) = response.embeddings.iter().find(|v| v.len() != self.dimensions) {
                return Err(ProviderError::InvalidResponse(format!(
                    "expected {}-dimensional embeddings, got {}",
                    self.dimensions,
                    bad.len()
                )));
            }
            vectors.extend(response.embeddings);
        }
        Ok(vectors)
    }
}
