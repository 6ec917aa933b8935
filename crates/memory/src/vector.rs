//! Vector similarity and ranking.
//!
//! Pure-Rust cosine similarity plus the top-k ranking every vector store
//! shares, so all backends order results identically.

use parley_core::document::{DocumentChunk, ScoredChunk};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank chunks by cosine similarity to `query`, best first, keeping at most `k`.
///
/// `chunks` must be in insertion order. Equal scores keep that order, which
/// for one document is its reading order, so results are deterministic.
pub fn rank_chunks<'a, I>(chunks: I, query: &[f32], k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = &'a DocumentChunk>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| ScoredChunk {
            score: cosine_similarity(&chunk.embedding, query),
            chunk: chunk.clone(),
        })
        .collect();

    // sort_by is stable: ties stay in insertion order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, ordinal: usize, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.into(),
            document_id: "doc".into(),
            namespace: "session:s1".into(),
            source: "notes.md".into(),
            text: format!("text of {id}"),
            embedding,
            ordinal,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // [1,1] · [1,0] = 1, |[1,1]| = sqrt(2), |[1,0]| = 1
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranks_by_similarity() {
        let chunks = vec![
            chunk("a", 0, vec![0.0, 1.0, 0.0]),
            chunk("b", 1, vec![1.0, 0.0, 0.0]),
            chunk("c", 2, vec![0.5, 0.5, 0.0]),
        ];
        let ids: Vec<String> = rank_chunks(&chunks, &[1.0, 0.0, 0.0], 10)
            .into_iter()
            .map(|s| s.chunk.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn ties_keep_document_order() {
        let chunks: Vec<_> = (0..5)
            .map(|i| chunk(&format!("c{i}"), i, vec![1.0, 0.0]))
            .collect();
        let ids: Vec<String> = rank_chunks(&chunks, &[1.0, 0.0], 3)
            .into_iter()
            .map(|s| s.chunk.id)
            .collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }

    #[test]
    fn respects_k() {
        let chunks: Vec<_> = (0..10)
            .map(|i| chunk(&format!("e{i}"), i, vec![1.0, i as f32 * 0.1]))
            .collect();
        assert_eq!(rank_chunks(&chunks, &[1.0, 0.0], 3).len(), 3);
        assert!(rank_chunks(&chunks, &[1.0, 0.0], 0).is_empty());
    }
}
