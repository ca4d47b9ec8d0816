//! Document ingest pipeline
//!
//! Per call: hash-deduplicate documents, chunk new ones, deduplicate chunk
//! texts against the store, embed what is genuinely new, wire up the
//! `chunk_sources` junction, resolve relation targets by title, and
//! recompute communities when relations were supplied. Database writes go
//! out in batches of 500 rows; the call is deliberately not one
//! transaction so large ingests make incremental progress.

use crate::chunk::{chunk, ChunkOptions};
use crate::community;
use crate::embed::{embed_in_batches, Embedder};
use crate::error::Result;
use crate::hash::{content_hash, sha256_hex};
use crate::models::{DocumentInput, IngestStats, RelationTarget};
use crate::backup::format::{append_backup_line, relation_for_backup, BackupChunk, BackupDocument};
use pgvector::Vector;
use sqlx::{PgPool, QueryBuilder};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Rows per database round-trip for lookups and bulk inserts
pub(crate) const DB_BATCH: usize = 500;

/// Transform applied to each chunk's text before hashing and embedding
pub type TransformChunkFn = Box<dyn Fn(&str, &DocumentInput) -> String + Send + Sync>;

/// Progress sink called once per input document, in input order
pub type ProgressFn = Box<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Ingest parameters
pub struct IngestOptions<'a> {
    /// Embedding provider, required
    pub embed: &'a dyn Embedder,

    /// Chunker options passed through unchanged
    pub chunk: ChunkOptions,

    /// Optional per-chunk transform (e.g. prepending title context)
    pub transform_chunk: Option<TransformChunkFn>,

    /// Embedding batch size
    pub batch_size: usize,

    /// When set, append each newly ingested document as a backup line
    pub backup_path: Option<PathBuf>,

    /// Relation targets keyed by source document title. Supplying this
    /// (even empty) triggers community detection after ingest.
    pub relations: Option<HashMap<String, Vec<RelationTarget>>>,

    pub on_progress: Option<ProgressFn>,
}

impl<'a> IngestOptions<'a> {
    pub fn new(embed: &'a dyn Embedder) -> Self {
        Self {
            embed,
            chunk: ChunkOptions::default(),
            transform_chunk: None,
            batch_size: crate::config::default_ingest_batch_size(),
            backup_path: None,
            relations: None,
            on_progress: None,
        }
    }
}

/// A unique chunk text gathered during this ingest call, with every place
/// it occurred
struct PendingChunk {
    text: String,
    token_count: i32,
    sources: Vec<(i64, i32, i32)>,
    embedding: Option<Vec<f32>>,
}

/// A relation row ready for insertion
#[derive(Debug, PartialEq)]
struct RelationRow {
    source_id: i64,
    target_id: i64,
    rel_type: Option<String>,
    weight: f32,
}

/// Run the ingest pipeline. See module docs for the phase breakdown.
pub async fn ingest(
    pool: &PgPool,
    docs: &[DocumentInput],
    opts: &IngestOptions<'_>,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let mut title_ids: HashMap<String, Vec<i64>> = HashMap::new();
    let mut inserted: Vec<(i64, String, &DocumentInput)> = Vec::new();
    let mut pending: HashMap<String, PendingChunk> = HashMap::new();
    let mut pending_order: Vec<String> = Vec::new();

    // Phase 1: insert documents and gather unique chunk texts.
    let total = docs.len();
    for (i, doc) in docs.iter().enumerate() {
        let doc_hash = content_hash(&doc.title, &doc.content);

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = $1")
                .bind(&doc_hash)
                .fetch_optional(pool)
                .await?;

        if existing.is_some() {
            debug!(title = %doc.title, "skipping duplicate document");
            stats.duplicates_skipped += 1;
        } else {
            let doc_id: i64 = sqlx::query_scalar(
                "INSERT INTO documents (title, content, content_hash, metadata) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(&doc_hash)
            .bind(&doc.metadata)
            .fetch_one(pool)
            .await?;

            stats.documents_inserted += 1;
            title_ids.entry(doc.title.clone()).or_default().push(doc_id);
            inserted.push((doc_id, doc_hash, doc));

            for c in chunk(&doc.content, &opts.chunk) {
                let final_text = match &opts.transform_chunk {
                    Some(f) => f(&c.text, doc),
                    None => c.text.clone(),
                };
                let text_hash = sha256_hex(&final_text);
                let entry = pending.entry(text_hash.clone()).or_insert_with(|| {
                    pending_order.push(text_hash);
                    PendingChunk {
                        text: final_text,
                        token_count: c.token_count as i32,
                        sources: Vec::new(),
                        embedding: None,
                    }
                });
                entry
                    .sources
                    .push((doc_id, c.start_index as i32, c.end_index as i32));
            }
        }

        if let Some(progress) = &opts.on_progress {
            progress(&doc.title, i + 1, total);
        }
    }

    // Phase 2: which chunk texts already exist?
    let existing_hashes = lookup_existing_hashes(pool, &pending_order).await?;
    stats.chunks_reused = existing_hashes.len() as u64;

    let new_hashes: Vec<String> = pending_order
        .iter()
        .filter(|h| !existing_hashes.contains(*h))
        .cloned()
        .collect();

    // Phase 3: embed the genuinely new texts, in first-seen order.
    let new_texts: Vec<String> = new_hashes
        .iter()
        .map(|h| pending[h].text.clone())
        .collect();
    let embeddings = embed_in_batches(opts.embed, new_texts, opts.batch_size).await?;
    for (hash, embedding) in new_hashes.iter().zip(embeddings) {
        if let Some(entry) = pending.get_mut(hash) {
            entry.embedding = Some(embedding);
        }
    }

    // Phase 4: insert new chunks, then resolve every hash to its chunk id.
    for batch in new_hashes.chunks(DB_BATCH) {
        if batch.is_empty() {
            continue;
        }
        let mut qb = QueryBuilder::new("INSERT INTO chunks (text, text_hash, token_count, embedding) ");
        qb.push_values(batch, |mut b, hash| {
            let entry = &pending[hash];
            // Embedding is present for every new hash after phase 3.
            let vector = entry.embedding.clone().unwrap_or_default();
            b.push_bind(entry.text.clone())
                .push_bind(hash.clone())
                .push_bind(entry.token_count)
                .push_bind(Vector::from(vector));
        });
        qb.push(" ON CONFLICT (text_hash) DO NOTHING");
        let result = qb.build().execute(pool).await?;
        stats.chunks_inserted += result.rows_affected();
    }

    let chunk_ids = lookup_chunk_ids(pool, &pending_order).await?;

    // Phase 5: junction rows, one per source occurrence.
    let mut source_rows: Vec<(i64, i64, i32, i32)> = Vec::new();
    for hash in &pending_order {
        let Some(chunk_id) = chunk_ids.get(hash) else {
            warn!(text_hash = %hash, "chunk disappeared between insert and lookup");
            continue;
        };
        for (doc_id, start, end) in &pending[hash].sources {
            source_rows.push((*chunk_id, *doc_id, *start, *end));
        }
    }
    for batch in source_rows.chunks(DB_BATCH) {
        let mut qb = QueryBuilder::new(
            "INSERT INTO chunk_sources (chunk_id, document_id, start_index, end_index) ",
        );
        qb.push_values(batch, |mut b, (chunk_id, doc_id, start, end)| {
            b.push_bind(chunk_id)
                .push_bind(doc_id)
                .push_bind(start)
                .push_bind(end);
        });
        qb.build().execute(pool).await?;
    }

    // Phase 6: backup lines for the newly inserted documents.
    if let Some(path) = &opts.backup_path {
        fill_reused_embeddings(pool, &mut pending, &existing_hashes).await?;
        for (_, doc_hash, doc) in &inserted {
            let line = backup_line(doc, doc_hash, &pending, opts)?;
            append_backup_line(path, &line)?;
        }
        debug!(documents = inserted.len(), path = %path.display(), "backup lines appended");
    }

    // Phase 7: relations, then community recomputation.
    if let Some(relations) = &opts.relations {
        resolve_referenced_titles(pool, relations, &mut title_ids).await?;
        let (rows, unresolved) = expand_relation_rows(relations, &title_ids);
        stats.unresolved_relations = unresolved;

        for batch in rows.chunks(DB_BATCH) {
            if batch.is_empty() {
                continue;
            }
            let mut qb = QueryBuilder::new(
                "INSERT INTO document_relations (source_id, target_id, rel_type, weight) ",
            );
            qb.push_values(batch, |mut b, row| {
                b.push_bind(row.source_id)
                    .push_bind(row.target_id)
                    .push_bind(row.rel_type.clone())
                    .push_bind(row.weight);
            });
            qb.push(" ON CONFLICT (source_id, target_id) DO NOTHING");
            let result = qb.build().execute(pool).await?;
            stats.relations_inserted += result.rows_affected();
        }

        stats.communities_detected = community::detect_communities(pool).await?;
    }

    info!(
        inserted = stats.documents_inserted,
        duplicates = stats.duplicates_skipped,
        chunks_inserted = stats.chunks_inserted,
        chunks_reused = stats.chunks_reused,
        relations = stats.relations_inserted,
        "ingest complete"
    );
    Ok(stats)
}

/// Which of the given text hashes already have chunk rows
async fn lookup_existing_hashes(
    pool: &PgPool,
    hashes: &[String],
) -> Result<HashSet<String>> {
    let mut existing = HashSet::new();
    for batch in hashes.chunks(DB_BATCH) {
        let found: Vec<String> =
            sqlx::query_scalar("SELECT text_hash FROM chunks WHERE text_hash = ANY($1)")
                .bind(batch)
                .fetch_all(pool)
                .await?;
        existing.extend(found);
    }
    Ok(existing)
}

/// Resolve text hashes to chunk ids
async fn lookup_chunk_ids(pool: &PgPool, hashes: &[String]) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::new();
    for batch in hashes.chunks(DB_BATCH) {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, text_hash FROM chunks WHERE text_hash = ANY($1)")
                .bind(batch)
                .fetch_all(pool)
                .await?;
        for (id, hash) in rows {
            ids.insert(hash, id);
        }
    }
    Ok(ids)
}

/// Fetch stored embeddings for reused chunk texts so backup lines can
/// carry them.
async fn fill_reused_embeddings(
    pool: &PgPool,
    pending: &mut HashMap<String, PendingChunk>,
    existing_hashes: &HashSet<String>,
) -> Result<()> {
    let missing: Vec<String> = existing_hashes
        .iter()
        .filter(|h| pending.get(*h).is_some_and(|p| p.embedding.is_none()))
        .cloned()
        .collect();

    for batch in missing.chunks(DB_BATCH) {
        let rows: Vec<(String, Vector)> =
            sqlx::query_as("SELECT text_hash, embedding FROM chunks WHERE text_hash = ANY($1)")
                .bind(batch)
                .fetch_all(pool)
                .await?;
        for (hash, vector) in rows {
            if let Some(entry) = pending.get_mut(&hash) {
                entry.embedding = Some(vector.to_vec());
            }
        }
    }
    Ok(())
}

/// Build the backup line for one newly inserted document by re-running the
/// chunker to recover ordered offsets.
fn backup_line(
    doc: &DocumentInput,
    doc_hash: &str,
    pending: &HashMap<String, PendingChunk>,
    opts: &IngestOptions<'_>,
) -> Result<BackupDocument> {
    let mut chunks = Vec::new();
    for c in chunk(&doc.content, &opts.chunk) {
        let final_text = match &opts.transform_chunk {
            Some(f) => f(&c.text, doc),
            None => c.text.clone(),
        };
        let text_hash = sha256_hex(&final_text);
        let embedding = pending
            .get(&text_hash)
            .and_then(|p| p.embedding.clone())
            .unwrap_or_default();
        chunks.push(BackupChunk {
            text: final_text,
            embedding,
            start_index: c.start_index as i32,
            end_index: c.end_index as i32,
            token_count: c.token_count as i32,
        });
    }

    let relations = opts
        .relations
        .as_ref()
        .and_then(|r| r.get(&doc.title))
        .map(|targets| {
            targets
                .iter()
                .map(|t| relation_for_backup(&t.normalize()))
                .collect()
        })
        .unwrap_or_default();

    Ok(BackupDocument {
        title: doc.title.clone(),
        content: doc.content.clone(),
        content_hash: doc_hash.to_string(),
        metadata: doc.metadata.clone(),
        community_id: None,
        chunks,
        relations,
    })
}

/// Extend the title map with ids of referenced titles that were not part
/// of this batch.
async fn resolve_referenced_titles(
    pool: &PgPool,
    relations: &HashMap<String, Vec<RelationTarget>>,
    title_ids: &mut HashMap<String, Vec<i64>>,
) -> Result<()> {
    let mut referenced: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (source, targets) in relations {
        if !title_ids.contains_key(source) && seen.insert(source.clone()) {
            referenced.push(source.clone());
        }
        for target in targets {
            let spec = target.normalize();
            if !title_ids.contains_key(&spec.title) && seen.insert(spec.title.clone()) {
                referenced.push(spec.title);
            }
        }
    }

    for batch in referenced.chunks(DB_BATCH) {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, title FROM documents WHERE title = ANY($1)")
                .bind(batch)
                .fetch_all(pool)
                .await?;
        for (id, title) in rows {
            title_ids.entry(title).or_default().push(id);
        }
    }

    // Referenced titles that stay absent still need (empty) entries so the
    // expansion step can tell "unresolved" apart from "unvisited".
    for title in referenced {
        title_ids.entry(title).or_default();
    }

    Ok(())
}

/// Expand the relations map into concrete rows using the resolved title
/// map. Self references are skipped silently; target titles with no ids
/// are reported once each.
fn expand_relation_rows(
    relations: &HashMap<String, Vec<RelationTarget>>,
    title_ids: &HashMap<String, Vec<i64>>,
) -> (Vec<RelationRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut unresolved = Vec::new();
    let mut unresolved_seen: HashSet<String> = HashSet::new();

    let mut source_titles: Vec<&String> = relations.keys().collect();
    source_titles.sort();

    for source_title in source_titles {
        let source_ids = title_ids
            .get(source_title)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for target in &relations[source_title] {
            let spec = target.normalize();

            if spec.title == *source_title {
                continue;
            }

            let target_ids = title_ids
                .get(&spec.title)
                .map(Vec::as_slice)
                .unwrap_or_default();

            if target_ids.is_empty() {
                if unresolved_seen.insert(spec.title.clone()) {
                    unresolved.push(spec.title.clone());
                }
                continue;
            }

            for &source_id in source_ids {
                for &target_id in target_ids {
                    rows.push(RelationRow {
                        source_id,
                        target_id,
                        rel_type: spec.rel_type.clone(),
                        weight: spec.weight.unwrap_or(1.0),
                    });
                }
            }
        }
    }

    (rows, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_map(entries: &[(&str, &[i64])]) -> HashMap<String, Vec<i64>> {
        entries
            .iter()
            .map(|(t, ids)| (t.to_string(), ids.to_vec()))
            .collect()
    }

    #[test]
    fn test_expand_relations_cartesian_product() {
        let relations = HashMap::from([(
            "A".to_string(),
            vec![RelationTarget::from("B")],
        )]);
        let titles = title_map(&[("A", &[1, 2]), ("B", &[3, 4])]);

        let (rows, unresolved) = expand_relation_rows(&relations, &titles);
        assert_eq!(rows.len(), 4);
        assert!(unresolved.is_empty());
        assert!(rows.iter().all(|r| r.weight == 1.0 && r.rel_type.is_none()));
    }

    #[test]
    fn test_expand_relations_skips_self_reference() {
        let relations = HashMap::from([(
            "A".to_string(),
            vec![RelationTarget::from("A"), RelationTarget::from("B")],
        )]);
        let titles = title_map(&[("A", &[1]), ("B", &[2])]);

        let (rows, unresolved) = expand_relation_rows(&relations, &titles);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_id, 2);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_expand_relations_reports_unresolved_once() {
        let relations = HashMap::from([
            ("A".to_string(), vec![RelationTarget::from("Ghost")]),
            ("B".to_string(), vec![RelationTarget::from("Ghost")]),
        ]);
        let titles = title_map(&[("A", &[1]), ("B", &[2]), ("Ghost", &[])]);

        let (rows, unresolved) = expand_relation_rows(&relations, &titles);
        assert!(rows.is_empty());
        assert_eq!(unresolved, vec!["Ghost".to_string()]);
    }

    #[test]
    fn test_expand_relations_carries_type_and_weight() {
        let relations = HashMap::from([(
            "A".to_string(),
            vec![RelationTarget::Detailed {
                title: "B".to_string(),
                rel_type: Some("cites".to_string()),
                weight: Some(0.25),
            }],
        )]);
        let titles = title_map(&[("A", &[1]), ("B", &[2])]);

        let (rows, _) = expand_relation_rows(&relations, &titles);
        assert_eq!(rows[0].rel_type.as_deref(), Some("cites"));
        assert_eq!(rows[0].weight, 0.25);
    }
}
