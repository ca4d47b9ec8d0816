//! Reranking support for search results

use crate::error::Result;
use async_trait::async_trait;

/// A reranker's verdict on one candidate document
#[derive(Debug, Clone)]
pub struct RerankResult {
    /// Index into the candidate list handed to `rerank`
    pub index: usize,
    pub score: f32,
}

/// Trait for cross-encoder style rerankers, supplied by the caller
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<RerankResult>>;
}

/// Reorder `items` by reranker score, descending. Candidates the reranker
/// did not score keep their relative order after the scored ones.
pub fn apply_rerank<T>(items: Vec<T>, verdicts: &[RerankResult]) -> Vec<T> {
    let mut indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
    let mut score_of = vec![f32::NEG_INFINITY; indexed.len()];
    for v in verdicts {
        if v.index < score_of.len() {
            score_of[v.index] = v.score;
        }
    }

    indexed.sort_by(|(a, _), (b, _)| {
        score_of[*b]
            .partial_cmp(&score_of[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    });

    indexed.into_iter().map(|(_, item)| item).collect()
}
