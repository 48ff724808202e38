//! # Similarity Retrieval
//!
//! Embeds a query, ranks every chunk in the workspace by cosine similarity,
//! and returns the top `k` joined with their parent documents for citation
//! metadata.
//!
//! Ranking happens in-process over a scoped fetch so the similarity
//! definition (`1 - cosine_distance`) and tie behavior are explicit. No
//! minimum-similarity floor is applied by default; callers may pass one.

use crate::errors::{ProviderError, StoreError};
use crate::providers::Embedder;
use crate::store::SqliteStore;
use crate::types::ChunkMatch;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

/// Default number of results returned when the caller does not specify `k`.
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] ProviderError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Cosine similarity of two vectors; 0.0 for zero-norm or mismatched-length
/// inputs rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Retrieves the `k` chunks most similar to `query_text`, scoped to one
/// workspace.
///
/// Results are ordered by descending similarity; ties keep the fetch order
/// (stable sort). `min_similarity` of `None` returns the top `k`
/// unconditionally.
pub async fn search_chunks(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    query_text: &str,
    workspace_id: &str,
    k: usize,
    min_similarity: Option<f32>,
) -> Result<Vec<ChunkMatch>, SearchError> {
    let query_embedding = embedder.embed(query_text).await?;

    let candidates = store.chunks_with_documents(workspace_id).await?;
    debug!(
        workspace_id,
        candidates = candidates.len(),
        "Ranking chunks for query"
    );

    let mut matches: Vec<ChunkMatch> = candidates
        .into_iter()
        .map(|(chunk, document)| {
            let similarity = cosine_similarity(&chunk.embedding, &query_embedding.vector);
            ChunkMatch {
                chunk,
                document,
                similarity,
            }
        })
        .filter(|m| min_similarity.is_none_or(|floor| m.similarity > floor))
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(k);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::cosine_similarity;

    #[test]
    fn test_cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
