//! Embedding generation
//!
//! The core never talks to an embedding provider directly: callers supply
//! an [`Embedder`] implementation (typically wrapping an OpenAI-compatible
//! HTTP endpoint) and the pipeline drives it in ordered batches.

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Embed texts in fixed-size batches, preserving input order. Batch `k+1`
/// is only issued after batch `k` completes.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let expected = texts.len();
    let dimension = embedder.dimension();
    let mut all_embeddings = Vec::with_capacity(expected);

    for batch in texts.chunks(batch_size.max(1)) {
        let batch_len = batch.len();
        let embeddings = embedder.embed(batch.to_vec()).await?;

        if embeddings.len() != batch_len {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                batch_len
            )));
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
            return Err(Error::Embedding(format!(
                "embedder returned a {}-dimensional vector, expected {}",
                bad.len(),
                dimension
            )));
        }

        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic embedder for tests: hashes each text into a small
    /// vector so distinct texts get distinct directions.
    pub struct StubEmbedder {
        pub dimension: usize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dimension];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dimension] += b as f32 / 255.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}
