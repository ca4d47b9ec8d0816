//! Backup export, validation, and import
//!
//! Backups are line-delimited JSON (see [`format`]): one document per
//! line, chunks carried with their embeddings so a restore never needs an
//! embedding provider. Import validates the whole file up front, then
//! restores one document per transaction.

pub mod format;

use crate::error::{Error, Result};
use crate::hash::sha256_hex;
use crate::ingest::DB_BATCH;
use crate::models::{ExportStats, ImportStats};
use format::{
    append_backup_line, read_backup_lines, relation_for_backup, truncate_backup, BackupChunk,
    BackupDocument,
};
use crate::models::RelationSpec;
use pgvector::Vector;
use serde::Serialize;
use sqlx::{FromRow, PgPool, QueryBuilder};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, FromRow)]
struct ExportRow {
    id: i64,
    title: String,
    content: String,
    content_hash: String,
    metadata: serde_json::Value,
    community_id: Option<i32>,
    text: Option<String>,
    token_count: Option<i32>,
    embedding: Option<Vector>,
    start_index: Option<i32>,
    end_index: Option<i32>,
}

#[derive(Debug, FromRow)]
struct RelationExportRow {
    source_id: i64,
    title: String,
    rel_type: Option<String>,
    weight: Option<f32>,
}

/// Export every document with its chunks and outgoing relations, one JSON
/// line per document. The target file is truncated first.
pub async fn export_backup(pool: &PgPool, path: &Path) -> Result<ExportStats> {
    let rows: Vec<ExportRow> = sqlx::query_as(
        "SELECT d.id, d.title, d.content, d.content_hash, d.metadata, d.community_id, \
                c.text, c.token_count, c.embedding, cs.start_index, cs.end_index \
         FROM documents d \
         LEFT JOIN chunk_sources cs ON cs.document_id = d.id \
         LEFT JOIN chunks c ON c.id = cs.chunk_id \
         ORDER BY d.id, cs.start_index",
    )
    .fetch_all(pool)
    .await?;

    // Group the joined stream by document id, keeping document order.
    let mut order: Vec<i64> = Vec::new();
    let mut docs: HashMap<i64, BackupDocument> = HashMap::new();
    for row in rows {
        let doc = docs.entry(row.id).or_insert_with(|| {
            order.push(row.id);
            BackupDocument {
                title: row.title.clone(),
                content: row.content.clone(),
                content_hash: row.content_hash.clone(),
                metadata: row.metadata.clone(),
                community_id: row.community_id,
                chunks: Vec::new(),
                relations: Vec::new(),
            }
        });
        if let (Some(text), Some(token_count), Some(embedding), Some(start), Some(end)) = (
            row.text,
            row.token_count,
            row.embedding,
            row.start_index,
            row.end_index,
        ) {
            doc.chunks.push(BackupChunk {
                text,
                embedding: embedding.to_vec(),
                start_index: start,
                end_index: end,
                token_count,
            });
        }
    }

    // Attach outgoing relation targets, 500 documents per round-trip.
    for batch in order.chunks(DB_BATCH) {
        let relations: Vec<RelationExportRow> = sqlx::query_as(
            "SELECT r.source_id, d.title, r.rel_type, r.weight \
             FROM document_relations r \
             JOIN documents d ON d.id = r.target_id \
             WHERE r.source_id = ANY($1)",
        )
        .bind(batch)
        .fetch_all(pool)
        .await?;

        for rel in relations {
            if let Some(doc) = docs.get_mut(&rel.source_id) {
                doc.relations.push(relation_for_backup(&RelationSpec {
                    title: rel.title,
                    rel_type: rel.rel_type,
                    weight: Some(rel.weight.unwrap_or(1.0)),
                }));
            }
        }
    }

    truncate_backup(path)?;
    for id in &order {
        append_backup_line(path, &docs[id])?;
    }

    info!(documents = order.len(), path = %path.display(), "backup exported");
    Ok(ExportStats {
        documents_exported: order.len() as u64,
        output_path: path.display().to_string(),
    })
}

/// Validation report over a backup file
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupValidation {
    pub valid: bool,
    pub total_documents: u64,
    pub total_chunks: u64,
    /// Distinct embedding lengths observed across all chunks
    pub dimensions: BTreeSet<usize>,
    pub errors: Vec<String>,
    pub duplicate_hashes: Vec<String>,
}

/// Validate backup lines without touching the database.
pub fn validate_backup_lines(lines: &[String]) -> BackupValidation {
    let mut report = BackupValidation::default();
    let mut seen_hashes: HashMap<String, u32> = HashMap::new();

    for (i, line) in lines.iter().enumerate() {
        let line_no = i + 1;
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                report.errors.push(format!("line {line_no}: invalid JSON: {e}"));
                continue;
            }
        };
        report.total_documents += 1;

        for field in ["title", "content", "contentHash"] {
            match value.get(field).and_then(|v| v.as_str()) {
                Some(s) if !s.is_empty() => {}
                _ => report
                    .errors
                    .push(format!("line {line_no}: missing or empty '{field}'")),
            }
        }

        if let Some(hash) = value.get("contentHash").and_then(|v| v.as_str()) {
            let count = seen_hashes.entry(hash.to_string()).or_insert(0);
            *count += 1;
            if *count == 2 {
                report.duplicate_hashes.push(hash.to_string());
            }
        }

        let Some(chunks) = value.get("chunks").and_then(|v| v.as_array()) else {
            report
                .errors
                .push(format!("line {line_no}: 'chunks' is not an array"));
            continue;
        };

        for (j, chunk) in chunks.iter().enumerate() {
            match chunk.get("embedding").and_then(|v| v.as_array()) {
                Some(embedding) => {
                    report.dimensions.insert(embedding.len());
                    report.total_chunks += 1;
                }
                None => report.errors.push(format!(
                    "line {line_no}: chunk {j} has no embedding array"
                )),
            }
        }
    }

    report.valid = report.errors.is_empty() && report.dimensions.len() <= 1;
    report
}

/// Validate a backup file on disk.
pub fn validate_backup(path: &Path) -> Result<BackupValidation> {
    let lines = read_backup_lines(path)?;
    Ok(validate_backup_lines(&lines))
}

/// Import a backup file. The whole file is validated first; per document,
/// dimension mismatches and content-hash duplicates are skipped with a
/// warning, everything else restores atomically. Relations resolve against
/// the imported titles afterwards.
pub async fn import_backup(
    pool: &PgPool,
    path: &Path,
    expected_dimension: Option<usize>,
) -> Result<ImportStats> {
    let lines = read_backup_lines(path)?;
    let validation = validate_backup_lines(&lines);
    if !validation.valid {
        return Err(Error::InvalidBackup {
            errors: validation.errors,
            dimensions: validation.dimensions.into_iter().collect(),
        });
    }

    let mut docs: Vec<BackupDocument> = Vec::with_capacity(lines.len());
    for line in &lines {
        docs.push(serde_json::from_str(line)?);
    }

    let mut stats = ImportStats::default();
    let mut title_ids: HashMap<String, Vec<i64>> = HashMap::new();

    for doc in &docs {
        if let (Some(expected), Some(first)) = (expected_dimension, doc.chunks.first()) {
            if first.embedding.len() != expected {
                warn!(title = %doc.title, "dimension mismatch, skipping document");
                stats.warnings.push(format!(
                    "skipping '{}': embedding dimension {} does not match {}",
                    doc.title,
                    first.embedding.len(),
                    expected
                ));
                continue;
            }
        }

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = $1")
                .bind(&doc.content_hash)
                .fetch_optional(pool)
                .await?;
        if let Some(id) = existing {
            stats.duplicates_skipped += 1;
            stats
                .warnings
                .push(format!("skipping duplicate document '{}'", doc.title));
            title_ids.entry(doc.title.clone()).or_default().push(id);
            continue;
        }

        // One transaction per document: a restore either lands a document
        // with all its chunks and sources, or not at all.
        let mut tx = pool.begin().await?;

        let doc_id: i64 = sqlx::query_scalar(
            "INSERT INTO documents (title, content, content_hash, metadata, community_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.content_hash)
        .bind(&doc.metadata)
        .bind(doc.community_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut chunks_inserted = 0u64;
        for chunk in &doc.chunks {
            let text_hash = sha256_hex(&chunk.text);

            let result = sqlx::query(
                "INSERT INTO chunks (text, text_hash, token_count, embedding) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (text_hash) DO NOTHING",
            )
            .bind(&chunk.text)
            .bind(&text_hash)
            .bind(chunk.token_count)
            .bind(Vector::from(chunk.embedding.clone()))
            .execute(&mut *tx)
            .await?;
            chunks_inserted += result.rows_affected();

            let chunk_id: i64 = sqlx::query_scalar("SELECT id FROM chunks WHERE text_hash = $1")
                .bind(&text_hash)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO chunk_sources (chunk_id, document_id, start_index, end_index) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(chunk_id)
            .bind(doc_id)
            .bind(chunk.start_index)
            .bind(chunk.end_index)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        stats.documents_imported += 1;
        stats.chunks_inserted += chunks_inserted;
        title_ids.entry(doc.title.clone()).or_default().push(doc_id);
        debug!(title = %doc.title, chunks = doc.chunks.len(), "document imported");
    }

    restore_relations(pool, &docs, &title_ids).await?;

    info!(
        imported = stats.documents_imported,
        duplicates = stats.duplicates_skipped,
        "backup import complete"
    );
    Ok(stats)
}

/// Insert relation rows for every imported line, resolving titles against
/// the imported (and pre-existing duplicate) ids.
async fn restore_relations(
    pool: &PgPool,
    docs: &[BackupDocument],
    title_ids: &HashMap<String, Vec<i64>>,
) -> Result<()> {
    let mut rows: Vec<(i64, i64, Option<String>, f32)> = Vec::new();

    for doc in docs {
        let Some(source_ids) = title_ids.get(&doc.title) else {
            continue;
        };
        for target in &doc.relations {
            let spec = target.normalize();
            if spec.title == doc.title {
                continue;
            }
            let Some(target_ids) = title_ids.get(&spec.title) else {
                continue;
            };
            for &source_id in source_ids {
                for &target_id in target_ids {
                    rows.push((
                        source_id,
                        target_id,
                        spec.rel_type.clone(),
                        spec.weight.unwrap_or(1.0),
                    ));
                }
            }
        }
    }

    for batch in rows.chunks(DB_BATCH) {
        let mut qb = QueryBuilder::new(
            "INSERT INTO document_relations (source_id, target_id, rel_type, weight) ",
        );
        qb.push_values(batch, |mut b, (source_id, target_id, rel_type, weight)| {
            b.push_bind(source_id)
                .push_bind(target_id)
                .push_bind(rel_type.clone())
                .push_bind(weight);
        });
        qb.push(" ON CONFLICT (source_id, target_id) DO NOTHING");
        qb.build().execute(pool).await?;
    }

    Ok(())
}
