//! Community detection, summaries, and community-routed global queries
//!
//! Two documents share a community iff they are connected in the
//! undirected relation graph. Detection is a plain union-find over all
//! document ids; isolated documents form singleton communities. Synthetic
//! summary documents describe each community and route global queries.

use crate::context::build_context;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::ingest::{ingest, IngestOptions, DB_BATCH};
use crate::models::{
    CommunityMember, DocumentInput, GlobalAnswer, PartialAnswer, SummaryStats,
};
use crate::rerank::{apply_rerank, Reranker};
use crate::search::{search, QueryMode, SearchOptions};
use crate::chunk::ChunkOptions;
use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use std::collections::HashMap;
use tracing::{debug, info};

/// Metadata key marking synthetic documents
pub const SUMMARY_TYPE_KEY: &str = "_ragts_type";
/// Metadata value marking community summaries
pub const SUMMARY_TYPE_VALUE: &str = "community_summary";
/// Metadata key holding the summarized community id
pub const SUMMARY_COMMUNITY_KEY: &str = "_ragts_community_id";
/// Metadata key holding the member document titles
pub const SUMMARY_MEMBERS_KEY: &str = "_ragts_member_titles";
/// Title prefix of summary documents, followed by the community id
pub const SUMMARY_TITLE_PREFIX: &str = "_ragts_community_";

/// Caller-supplied community summarizer
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, members: &[CommunityMember]) -> Result<String>;
}

/// Caller-supplied answer generator
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, context: &str, query: &str) -> Result<String>;
}

/// Union-find with path compression and arbitrary-root union
struct UnionFind {
    parent: HashMap<i64, i64>,
}

impl UnionFind {
    fn new(ids: &[i64]) -> Self {
        Self {
            parent: ids.iter().map(|&id| (id, id)).collect(),
        }
    }

    fn find(&mut self, id: i64) -> i64 {
        let mut root = id;
        while let Some(&p) = self.parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }
        // Compress the walked path.
        let mut cur = id;
        while let Some(&p) = self.parent.get(&cur) {
            if p == root {
                break;
            }
            self.parent.insert(cur, root);
            cur = p;
        }
        root
    }

    fn union(&mut self, a: i64, b: i64) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }
}

/// Recompute `community_id` for every document from the relation graph.
/// Returns the number of distinct communities.
pub async fn detect_communities(pool: &PgPool) -> Result<u32> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
        .fetch_all(pool)
        .await?;
    if ids.is_empty() {
        return Ok(0);
    }

    let edges: Vec<(i64, i64)> =
        sqlx::query_as("SELECT source_id, target_id FROM document_relations")
            .fetch_all(pool)
            .await?;

    let mut uf = UnionFind::new(&ids);
    for (source, target) in edges {
        uf.union(source, target);
    }

    // Canonical ids are handed out in the order roots first appear when
    // walking documents by id.
    let mut canonical: HashMap<i64, i32> = HashMap::new();
    let mut assignments: Vec<(i64, i32)> = Vec::with_capacity(ids.len());
    for &id in &ids {
        let root = uf.find(id);
        let next = canonical.len() as i32;
        let community = *canonical.entry(root).or_insert(next);
        assignments.push((id, community));
    }

    for batch in assignments.chunks(DB_BATCH) {
        let mut qb =
            QueryBuilder::new("UPDATE documents AS d SET community_id = v.community_id FROM (");
        qb.push_values(batch, |mut b, (id, community)| {
            b.push_bind(id).push_bind(community);
        });
        qb.push(") AS v(id, community_id) WHERE d.id = v.id");
        qb.build().execute(pool).await?;
    }

    let count = canonical.len() as u32;
    info!(documents = ids.len(), communities = count, "community detection complete");
    Ok(count)
}

/// Parameters for building community summaries
pub struct SummaryOptions<'a> {
    pub embed: &'a dyn Embedder,
    pub summarize: &'a dyn Summarizer,

    /// Communities smaller than this are not summarized
    pub min_community_size: usize,

    pub chunk: ChunkOptions,
}

impl<'a> SummaryOptions<'a> {
    pub fn new(embed: &'a dyn Embedder, summarize: &'a dyn Summarizer) -> Self {
        Self {
            embed,
            summarize,
            min_community_size: 2,
            chunk: ChunkOptions::default(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    title: String,
    content: String,
    community_id: i32,
}

/// Replace all community-summary documents with freshly generated ones.
pub async fn build_community_summaries(
    pool: &PgPool,
    opts: &SummaryOptions<'_>,
) -> Result<SummaryStats> {
    sqlx::query("DELETE FROM documents WHERE metadata->>$1 = $2")
        .bind(SUMMARY_TYPE_KEY)
        .bind(SUMMARY_TYPE_VALUE)
        .execute(pool)
        .await?;

    let members: Vec<MemberRow> = sqlx::query_as(
        "SELECT title, content, community_id FROM documents \
         WHERE community_id IS NOT NULL \
           AND COALESCE(metadata->>$1, '') <> $2 \
         ORDER BY community_id, id",
    )
    .bind(SUMMARY_TYPE_KEY)
    .bind(SUMMARY_TYPE_VALUE)
    .fetch_all(pool)
    .await?;

    let mut by_community: Vec<(i32, Vec<CommunityMember>)> = Vec::new();
    for row in members {
        match by_community.last_mut() {
            Some((community, list)) if *community == row.community_id => {
                list.push(CommunityMember {
                    title: row.title,
                    content: row.content,
                });
            }
            _ => by_community.push((
                row.community_id,
                vec![CommunityMember {
                    title: row.title,
                    content: row.content,
                }],
            )),
        }
    }

    let mut stats = SummaryStats::default();
    for (community, members) in by_community {
        if members.len() < opts.min_community_size {
            continue;
        }
        stats.communities_processed += 1;

        let summary_text = opts.summarize.summarize(&members).await?;
        let member_titles: Vec<&str> = members.iter().map(|m| m.title.as_str()).collect();

        let doc = DocumentInput {
            title: format!("{SUMMARY_TITLE_PREFIX}{community}"),
            content: summary_text,
            metadata: serde_json::json!({
                "_ragts_type": SUMMARY_TYPE_VALUE,
                "_ragts_community_id": community,
                "_ragts_member_titles": member_titles,
            }),
        };

        // No relations argument: summary ingestion must not retrigger
        // community detection.
        let ingest_opts = IngestOptions {
            chunk: opts.chunk.clone(),
            ..IngestOptions::new(opts.embed)
        };
        let result = ingest(pool, &[doc], &ingest_opts).await?;
        stats.summaries_generated += result.documents_inserted;
        debug!(community, "community summary ingested");
    }

    Ok(stats)
}

/// Parameters for a community-routed global query
pub struct GlobalQueryOptions<'a> {
    pub embed: &'a dyn Embedder,
    pub generate: &'a dyn AnswerGenerator,
    pub query: String,

    /// Per-community vector search depth
    pub limit: usize,

    /// How many communities (by ascending id) participate
    pub max_communities: usize,

    pub rerank: Option<&'a dyn Reranker>,
}

impl<'a> GlobalQueryOptions<'a> {
    pub fn new(
        embed: &'a dyn Embedder,
        generate: &'a dyn AnswerGenerator,
        query: impl Into<String>,
    ) -> Self {
        Self {
            embed,
            generate,
            query: query.into(),
            limit: 10,
            max_communities: 5,
            rerank: None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    title: String,
    metadata: serde_json::Value,
}

/// Answer a query by consulting each community through its summary
/// document, then combining the per-community answers.
pub async fn global_query(pool: &PgPool, opts: &GlobalQueryOptions<'_>) -> Result<GlobalAnswer> {
    let summaries: Vec<SummaryRow> = sqlx::query_as(
        "SELECT title, metadata FROM documents \
         WHERE metadata->>$1 = $2 \
         ORDER BY (metadata->>$3)::int \
         LIMIT $4",
    )
    .bind(SUMMARY_TYPE_KEY)
    .bind(SUMMARY_TYPE_VALUE)
    .bind(SUMMARY_COMMUNITY_KEY)
    .bind(opts.max_communities as i64)
    .fetch_all(pool)
    .await?;

    let mut partial_answers = Vec::new();
    for summary in summaries {
        let community = summary
            .metadata
            .get(SUMMARY_COMMUNITY_KEY)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                Error::Other(format!(
                    "summary document '{}' lacks a community id",
                    summary.title
                ))
            })? as i32;

        let member_titles: Vec<String> = summary
            .metadata
            .get(SUMMARY_MEMBERS_KEY)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let search_opts = SearchOptions {
            query: opts.query.clone(),
            mode: QueryMode::Vector,
            limit: opts.limit,
            ..SearchOptions::default()
        };
        let results = search(pool, opts.embed, &search_opts).await?;

        let mut scoped: Vec<_> = results
            .into_iter()
            .filter(|r| r.title == summary.title || member_titles.contains(&r.title))
            .collect();

        if scoped.is_empty() {
            debug!(community, "no in-community results, skipping");
            continue;
        }

        if let Some(reranker) = opts.rerank {
            let texts: Vec<String> = scoped.iter().map(|r| r.text.clone()).collect();
            let verdicts = reranker.rerank(&opts.query, texts).await?;
            scoped = apply_rerank(scoped, &verdicts);
        }

        let context = build_context(&scoped);
        let answer = opts.generate.generate(&context, &opts.query).await?;
        partial_answers.push(PartialAnswer {
            community_id: community,
            answer,
        });
    }

    let combined: String = partial_answers
        .iter()
        .map(|p| format!("[Community {}]\n{}\n\n", p.community_id, p.answer))
        .collect();
    let answer = opts.generate.generate(&combined, &opts.query).await?;

    Ok(GlobalAnswer {
        answer,
        partial_answers,
    })
}
