//! Relation-graph expansion and community boost
//!
//! Expansion walks `document_relations` undirected from the documents
//! already in the result set, bounded by hop count and guarded against
//! cycles with a per-path visited array. The walk runs database-side as a
//! recursive CTE with bound parameters.

use crate::error::Result;
use crate::models::{SearchMode, SearchResult};
use crate::search::SearchOptions;
use pgvector::Vector;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::debug;

/// Undirected bounded walk from the seed documents. Seeds themselves are
/// never re-entered, each path keeps a visited array, and every reached
/// document collapses to its best (maximum path-weight) path, carrying
/// that path's relation type.
const GRAPH_WALK_SQL: &str = r#"
WITH RECURSIVE graph_walk AS (
    SELECT
        CASE WHEN r.source_id = ANY($1) THEN r.target_id ELSE r.source_id END AS doc_id,
        1 AS depth,
        (COALESCE(r.weight, 1.0) * $3)::real AS path_weight,
        r.rel_type,
        ARRAY[CASE WHEN r.source_id = ANY($1) THEN r.target_id ELSE r.source_id END] AS visited
    FROM document_relations r
    WHERE (r.source_id = ANY($1) OR r.target_id = ANY($1))
      AND NOT (CASE WHEN r.source_id = ANY($1) THEN r.target_id ELSE r.source_id END = ANY($1))

    UNION ALL

    SELECT
        CASE WHEN r.source_id = w.doc_id THEN r.target_id ELSE r.source_id END,
        w.depth + 1,
        (w.path_weight * COALESCE(r.weight, 1.0) * $3)::real,
        r.rel_type,
        w.visited || CASE WHEN r.source_id = w.doc_id THEN r.target_id ELSE r.source_id END
    FROM document_relations r
    JOIN graph_walk w ON r.source_id = w.doc_id OR r.target_id = w.doc_id
    WHERE w.depth < $2
      AND NOT (CASE WHEN r.source_id = w.doc_id THEN r.target_id ELSE r.source_id END = ANY($1))
      AND NOT (CASE WHEN r.source_id = w.doc_id THEN r.target_id ELSE r.source_id END = ANY(w.visited))
)
SELECT DISTINCT ON (doc_id) doc_id, path_weight, rel_type
FROM graph_walk
ORDER BY doc_id, path_weight DESC
"#;

/// Chunks of the expanded documents, excluding chunks already retrieved.
/// A shared chunk resolves to its newest source among the expansion set.
const GRAPH_CHUNKS_SQL: &str = r#"
SELECT sub.id, sub.text, sub.document_id, d.title, d.community_id
FROM (
    SELECT DISTINCT ON (c.id) c.id, c.text, cs.document_id
    FROM chunk_sources cs
    JOIN chunks c ON c.id = cs.chunk_id
    WHERE cs.document_id = ANY($1)
      AND NOT (c.id = ANY($2))
    ORDER BY c.id, cs.document_id DESC
) sub
JOIN documents d ON d.id = sub.document_id
LIMIT $3
"#;

/// Community chunks ordered by similarity to the query, skipping summary
/// documents and chunks already retrieved.
const COMMUNITY_CHUNKS_SQL: &str = r#"
SELECT sub.id, sub.text, sub.document_id, d.title, d.community_id
FROM (
    SELECT DISTINCT ON (c.id) c.id, c.text, cs.document_id,
           (c.embedding <=> $1)::real AS distance
    FROM chunk_sources cs
    JOIN chunks c ON c.id = cs.chunk_id
    JOIN documents sd ON sd.id = cs.document_id
    WHERE sd.community_id = $2
      AND COALESCE(sd.metadata->>'_ragts_type', '') <> 'community_summary'
      AND NOT (c.id = ANY($3))
    ORDER BY c.id, cs.document_id DESC
) sub
JOIN documents d ON d.id = sub.document_id
ORDER BY sub.distance
LIMIT $4
"#;

#[derive(Debug, FromRow)]
struct WalkRow {
    doc_id: i64,
    path_weight: f32,
    rel_type: Option<String>,
}

#[derive(Debug, FromRow)]
struct ExpansionChunkRow {
    id: i64,
    text: String,
    document_id: i64,
    title: String,
    community_id: Option<i32>,
}

/// Append graph-mode results reached within `graph_hops` of the current
/// result documents.
pub(crate) async fn expand_graph(
    pool: &PgPool,
    results: &mut Vec<SearchResult>,
    opts: &SearchOptions,
) -> Result<()> {
    let mut seed_docs: Vec<i64> = results.iter().map(|r| r.document_id).collect();
    seed_docs.sort_unstable();
    seed_docs.dedup();
    if seed_docs.is_empty() {
        return Ok(());
    }

    let walk: Vec<WalkRow> = sqlx::query_as(GRAPH_WALK_SQL)
        .bind(&seed_docs)
        .bind(opts.graph_hops as i32)
        .bind(opts.graph_decay)
        .fetch_all(pool)
        .await?;
    if walk.is_empty() {
        return Ok(());
    }
    debug!(reached = walk.len(), hops = opts.graph_hops, "graph walk complete");

    let reached: HashMap<i64, &WalkRow> = walk.iter().map(|w| (w.doc_id, w)).collect();
    let reached_ids: Vec<i64> = walk.iter().map(|w| w.doc_id).collect();
    let exclude_chunks: Vec<i64> = results.iter().map(|r| r.id).collect();

    let mut rows: Vec<ExpansionChunkRow> = sqlx::query_as(GRAPH_CHUNKS_SQL)
        .bind(&reached_ids)
        .bind(&exclude_chunks)
        .bind(opts.graph_chunk_limit)
        .fetch_all(pool)
        .await?;

    // Best-path weight of the chunk's document decides expansion order.
    rows.sort_by(|a, b| {
        let wa = reached.get(&a.document_id).map(|w| w.path_weight).unwrap_or(0.0);
        let wb = reached.get(&b.document_id).map(|w| w.path_weight).unwrap_or(0.0);
        wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
    });

    for (i, row) in rows.into_iter().enumerate() {
        let rel_type = reached
            .get(&row.document_id)
            .and_then(|w| w.rel_type.clone());
        results.push(SearchResult {
            id: row.id,
            document_id: row.document_id,
            title: row.title,
            text: row.text,
            score: opts.graph_weight / (opts.rrf_k + i as f32 + 1.0),
            mode: SearchMode::Graph,
            community_id: row.community_id,
            relation_type: rel_type,
        });
    }

    Ok(())
}

/// Append community-mode results from the community dominating the current
/// result set, ranked by similarity to the query embedding.
pub(crate) async fn community_boost(
    pool: &PgPool,
    results: &mut Vec<SearchResult>,
    query_vec: &[f32],
    boost: f32,
    opts: &SearchOptions,
) -> Result<()> {
    let Some(top_community) = dominant_community(results) else {
        return Ok(());
    };

    let exclude_chunks: Vec<i64> = results.iter().map(|r| r.id).collect();

    let rows: Vec<ExpansionChunkRow> = sqlx::query_as(COMMUNITY_CHUNKS_SQL)
        .bind(Vector::from(query_vec.to_vec()))
        .bind(top_community)
        .bind(&exclude_chunks)
        .bind(opts.graph_chunk_limit)
        .fetch_all(pool)
        .await?;
    debug!(community = top_community, added = rows.len(), "community boost complete");

    for (i, row) in rows.into_iter().enumerate() {
        results.push(SearchResult {
            id: row.id,
            document_id: row.document_id,
            title: row.title,
            text: row.text,
            score: boost / (opts.rrf_k + i as f32 + 1.0),
            mode: SearchMode::Community,
            community_id: row.community_id,
            relation_type: None,
        });
    }

    Ok(())
}

/// Most frequent community among the current results, ties broken
/// arbitrarily; `None` when no result carries a community.
fn dominant_community(results: &[SearchResult]) -> Option<i32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for r in results {
        if let Some(c) = r.community_id {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(c, _)| c)
}
