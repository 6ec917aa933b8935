//! One namespace's chunks, shared by the in-memory and file vector stores.

use crate::vector::rank_chunks;
use parley_core::document::{DocumentChunk, NamespaceStats, ScoredChunk};
use parley_core::embedding::EmbeddingVersion;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceIndex {
    pub version: EmbeddingVersion,
    /// Insertion order; replaced chunks keep their slot.
    pub chunks: Vec<DocumentChunk>,
}

impl NamespaceIndex {
    pub fn new(version: EmbeddingVersion) -> Self {
        Self {
            version,
            chunks: Vec::new(),
        }
    }

    /// Insert or replace by chunk id. Returns how many chunks were written.
    pub fn upsert(&mut self, chunks: Vec<DocumentChunk>) -> usize {
        let written = chunks.len();
        let mut slots: HashMap<String, usize> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        for chunk in chunks {
            match slots.get(&chunk.id) {
                Some(&i) => self.chunks[i] = chunk,
                None => {
                    slots.insert(chunk.id.clone(), self.chunks.len());
                    self.chunks.push(chunk);
                }
            }
        }
        written
    }

    pub fn query(&self, embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        rank_chunks(&self.chunks, embedding, k)
    }

    /// Remove chunks of `document_id` with an ordinal of `keep` or more.
    pub fn prune_document(&mut self, document_id: &str, keep: usize) -> usize {
        let before = self.chunks.len();
        self.chunks
            .retain(|c| c.document_id != document_id || c.ordinal < keep);
        before - self.chunks.len()
    }

    pub fn stats(&self, namespace: &str) -> NamespaceStats {
        let documents: HashSet<&str> = self.chunks.iter().map(|c| c.document_id.as_str()).collect();
        NamespaceStats {
            namespace: namespace.to_string(),
            chunks: self.chunks.len(),
            documents: documents.len(),
            version: self.version.clone(),
        }
    }
}
