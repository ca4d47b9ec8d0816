//! Hybrid search over chunks
//!
//! Primary retrieval runs vector similarity (DiskANN, cosine) and/or BM25
//! full-text, fusing the two with reciprocal rank fusion. Results can then
//! be expanded along the document relation graph and boosted from the
//! dominant community (see [`graph`]).

pub mod graph;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::models::{SearchMode, SearchResult};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Which primary retrieval to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Vector,
    Bm25,
    #[default]
    Hybrid,
}

/// Search parameters. Defaults mirror the facade contract: hybrid mode,
/// ten results, RRF constant 60, unit weights, no expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Full-text query; also the embedding input unless `vector_query` is set
    pub query: String,

    /// Alternative text to embed (HyDE style) instead of `query`
    #[serde(default)]
    pub vector_query: Option<String>,

    #[serde(default)]
    pub mode: QueryMode,

    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum cosine similarity for vector hits
    #[serde(default)]
    pub threshold: Option<f32>,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    #[serde(default = "default_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_weight")]
    pub bm25_weight: f32,

    /// Relation-graph expansion depth; 0 disables expansion
    #[serde(default)]
    pub graph_hops: u32,

    #[serde(default = "default_weight")]
    pub graph_weight: f32,

    /// Per-hop weight multiplier applied along each path
    #[serde(default = "default_weight")]
    pub graph_decay: f32,

    /// Cap on chunks fetched by graph or community expansion
    #[serde(default = "default_graph_chunk_limit")]
    pub graph_chunk_limit: i64,

    /// Enables community expansion when positive
    #[serde(default)]
    pub community_boost: Option<f32>,
}

fn default_limit() -> usize {
    10
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_weight() -> f32 {
    1.0
}

fn default_graph_chunk_limit() -> i64 {
    200
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            vector_query: None,
            mode: QueryMode::default(),
            limit: default_limit(),
            threshold: None,
            rrf_k: default_rrf_k(),
            vector_weight: default_weight(),
            bm25_weight: default_weight(),
            graph_hops: 0,
            graph_weight: default_weight(),
            graph_decay: default_weight(),
            graph_chunk_limit: default_graph_chunk_limit(),
            community_boost: None,
        }
    }
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, FromRow)]
struct HitRow {
    id: i64,
    text: String,
    score: f32,
    document_id: i64,
    title: String,
    community_id: Option<i32>,
}

impl HitRow {
    fn into_result(self, mode: SearchMode) -> SearchResult {
        SearchResult {
            id: self.id,
            document_id: self.document_id,
            title: self.title,
            text: self.text,
            score: self.score,
            mode,
            community_id: self.community_id,
            relation_type: None,
        }
    }
}

/// Chunks ranked by cosine similarity. Shared chunks resolve to their
/// newest source document.
const VECTOR_SQL: &str = r#"
SELECT sub.id, sub.text, sub.similarity AS score, sub.document_id, d.title, d.community_id
FROM (
    SELECT c.id, c.text,
           (1 - (c.embedding <=> $1))::real AS similarity,
           MAX(cs.document_id) AS document_id
    FROM chunks c
    JOIN chunk_sources cs ON cs.chunk_id = c.id
    WHERE $3::real IS NULL OR (1 - (c.embedding <=> $1))::real > $3
    GROUP BY c.id
    ORDER BY similarity DESC
    LIMIT $2
) sub
JOIN documents d ON d.id = sub.document_id
ORDER BY sub.similarity DESC
"#;

/// Chunks ranked by the BM25 distance operator; negative distance means a
/// match, surfaced as a positive score.
const BM25_SQL: &str = r#"
SELECT sub.id, sub.text, (-sub.distance)::real AS score, sub.document_id, d.title, d.community_id
FROM (
    SELECT c.id, c.text,
           (c.text <&> $1)::real AS distance,
           MAX(cs.document_id) AS document_id
    FROM chunks c
    JOIN chunk_sources cs ON cs.chunk_id = c.id
    WHERE (c.text <&> $1) < 0
    GROUP BY c.id
    ORDER BY distance
    LIMIT $2
) sub
JOIN documents d ON d.id = sub.document_id
ORDER BY sub.distance
"#;

async fn vector_search(
    pool: &PgPool,
    query_vec: &[f32],
    fetch_limit: i64,
    threshold: Option<f32>,
) -> Result<Vec<SearchResult>> {
    let rows: Vec<HitRow> = sqlx::query_as(VECTOR_SQL)
        .bind(Vector::from(query_vec.to_vec()))
        .bind(fetch_limit)
        .bind(threshold)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| r.into_result(SearchMode::Vector))
        .collect())
}

async fn bm25_search(pool: &PgPool, query: &str, fetch_limit: i64) -> Result<Vec<SearchResult>> {
    let rows: Vec<HitRow> = sqlx::query_as(BM25_SQL)
        .bind(query)
        .bind(fetch_limit)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| r.into_result(SearchMode::Bm25))
        .collect())
}

/// Reciprocal rank fusion of the two primary result lists. Ranks are
/// 1-based; a chunk missing from one list contributes nothing for it.
/// Surviving rows keep `mode = vector` regardless of which list produced
/// them; the fused score replaces the raw ones.
fn rrf_fuse(
    vector_hits: Vec<SearchResult>,
    bm25_hits: Vec<SearchResult>,
    rrf_k: f32,
    vector_weight: f32,
    bm25_weight: f32,
) -> Vec<SearchResult> {
    let mut fused: HashMap<i64, SearchResult> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();

    for (rank, mut hit) in vector_hits.into_iter().enumerate() {
        let rrf = vector_weight / (rrf_k + rank as f32 + 1.0);
        hit.mode = SearchMode::Vector;
        hit.score = 0.0;
        let entry = fused.entry(hit.id).or_insert_with(|| {
            order.push(hit.id);
            hit
        });
        entry.score += rrf;
    }

    for (rank, mut hit) in bm25_hits.into_iter().enumerate() {
        let rrf = bm25_weight / (rrf_k + rank as f32 + 1.0);
        hit.mode = SearchMode::Vector;
        hit.score = 0.0;
        let entry = fused.entry(hit.id).or_insert_with(|| {
            order.push(hit.id);
            hit
        });
        entry.score += rrf;
    }

    let mut results: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| fused.remove(&id))
        .collect();
    sort_by_score(&mut results);
    results
}

/// Keep the first occurrence of each chunk text, then truncate.
fn dedup_by_text(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(limit);
    for r in results {
        if seen.insert(r.text.clone()) {
            out.push(r);
            if out.len() == limit {
                break;
            }
        }
    }
    out
}

pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Run a search: primary retrieval, text dedup, then optional graph and
/// community expansion.
pub async fn search(
    pool: &PgPool,
    embedder: &dyn Embedder,
    opts: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let fetch_limit = (opts.limit * 3) as i64;

    let mut query_vec: Option<Vec<f32>> = None;
    if opts.mode != QueryMode::Bm25 {
        query_vec = Some(embed_query(embedder, opts).await?);
    }

    let results = match opts.mode {
        QueryMode::Vector => {
            let vec = query_vec.as_deref().unwrap_or_default();
            vector_search(pool, vec, fetch_limit, opts.threshold).await?
        }
        QueryMode::Bm25 => bm25_search(pool, &opts.query, fetch_limit).await?,
        QueryMode::Hybrid => {
            let vec = query_vec.as_deref().unwrap_or_default();
            let (vector_hits, bm25_hits) = tokio::try_join!(
                vector_search(pool, vec, fetch_limit, opts.threshold),
                bm25_search(pool, &opts.query, fetch_limit)
            )?;
            rrf_fuse(
                vector_hits,
                bm25_hits,
                opts.rrf_k,
                opts.vector_weight,
                opts.bm25_weight,
            )
        }
    };

    let mut results = dedup_by_text(results, opts.limit);
    debug!(primary = results.len(), mode = ?opts.mode, "primary search complete");

    let mut expanded = false;

    if opts.graph_hops > 0 {
        graph::expand_graph(pool, &mut results, opts).await?;
        expanded = true;
    }

    if let Some(boost) = opts.community_boost {
        if boost > 0.0 {
            let vec = match query_vec {
                Some(v) => v,
                None => embed_query(embedder, opts).await?,
            };
            graph::community_boost(pool, &mut results, &vec, boost, opts).await?;
            expanded = true;
        }
    }

    if expanded {
        sort_by_score(&mut results);
    }

    Ok(results)
}

async fn embed_query(embedder: &dyn Embedder, opts: &SearchOptions) -> Result<Vec<f32>> {
    let text = opts
        .vector_query
        .clone()
        .unwrap_or_else(|| opts.query.clone());
    let mut vectors = embedder.embed(vec![text]).await?;
    vectors
        .pop()
        .ok_or_else(|| Error::Embedding("embedder returned no vector for the query".to_string()))
}
