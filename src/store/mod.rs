//! The `Archive` facade
//!
//! A stateful handle over the PostgreSQL-backed corpus. The connection
//! pool is created lazily: constructing an `Archive` never touches the
//! network, the first operation does. Sibling calls on one handle are not
//! synchronized against each other; callers must not drop the schema
//! while another call is in flight.

mod schema;

use crate::backup;
use crate::backup::BackupValidation;
use crate::community::{self, AnswerGenerator, GlobalQueryOptions, SummaryOptions};
use crate::config::StoreConfig;
use crate::context::build_graph_context;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::ingest::{self, IngestOptions};
use crate::models::{
    DocumentInput, ExportStats, GlobalAnswer, ImportStats, IngestStats, QueryResponse,
    RelationEdge, SearchResult, SummaryStats,
};
use crate::search::{self, SearchOptions};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::path::Path;
use tracing::{debug, info};

/// Handle over a PostgreSQL-backed RAG corpus
pub struct Archive {
    pool: PgPool,
    config: StoreConfig,
}

impl Archive {
    /// Build a handle from a validated config. The pool connects on first
    /// use.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&config.connection_string)?;
        debug!(dimension = config.dimension, "archive handle created");
        Ok(Self { pool, config })
    }

    /// The underlying pool, for callers that need direct queries
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The embedding dimension this handle was configured with
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Create extensions, tables, and indexes. Idempotent.
    pub async fn init(&self) -> Result<()> {
        let sql = schema::render_schema_sql(self.config.dimension, &self.config.text_config);
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        info!(dimension = self.config.dimension, "schema initialized");
        Ok(())
    }

    /// Drop all four tables. Extensions are left installed.
    pub async fn drop_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::DROP_SQL).execute(&self.pool).await?;
        info!("schema dropped");
        Ok(())
    }

    /// Ingest documents (see [`crate::ingest`])
    pub async fn ingest(
        &self,
        docs: &[DocumentInput],
        opts: &IngestOptions<'_>,
    ) -> Result<IngestStats> {
        self.check_embedder(opts.embed)?;
        ingest::ingest(&self.pool, docs, opts).await
    }

    /// Run a search (see [`crate::search`])
    pub async fn retrieve(
        &self,
        embedder: &dyn Embedder,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.check_embedder(embedder)?;
        search::search(&self.pool, embedder, opts).await
    }

    /// Retrieve, build a relation-aware context, and generate an answer.
    pub async fn query(
        &self,
        embedder: &dyn Embedder,
        generate: &dyn AnswerGenerator,
        opts: &SearchOptions,
    ) -> Result<QueryResponse> {
        let results = self.retrieve(embedder, opts).await?;

        let mut doc_ids: Vec<i64> = results.iter().map(|r| r.document_id).collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();
        let relations = self.fetch_relations(&doc_ids).await?;

        let context = build_graph_context(&results, &relations);
        let answer = generate.generate(&context, &opts.query).await?;

        Ok(QueryResponse {
            answer,
            context,
            results,
        })
    }

    /// Relation edges touching any of the given documents, in either
    /// direction, rendered with document titles.
    pub async fn fetch_relations(&self, document_ids: &[i64]) -> Result<Vec<RelationEdge>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        #[derive(FromRow)]
        struct EdgeRow {
            source_title: String,
            target_title: String,
            rel_type: Option<String>,
        }

        let rows: Vec<EdgeRow> = sqlx::query_as(
            "SELECT sd.title AS source_title, td.title AS target_title, r.rel_type \
             FROM document_relations r \
             JOIN documents sd ON sd.id = r.source_id \
             JOIN documents td ON td.id = r.target_id \
             WHERE r.source_id = ANY($1) OR r.target_id = ANY($1) \
             ORDER BY r.id",
        )
        .bind(document_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RelationEdge {
                source_title: r.source_title,
                target_title: r.target_title,
                rel_type: r.rel_type,
            })
            .collect())
    }

    /// Export the full corpus to a line-delimited JSON backup file
    pub async fn export_backup(&self, path: &Path) -> Result<ExportStats> {
        backup::export_backup(&self.pool, path).await
    }

    /// Validate a backup file without touching the database
    pub fn validate_backup(&self, path: &Path) -> Result<BackupValidation> {
        backup::validate_backup(path)
    }

    /// Import a backup file. `expected_dimension` defaults to nothing;
    /// pass `Some(handle.dimension())` to skip documents whose embeddings
    /// do not fit this store.
    pub async fn import_backup(
        &self,
        path: &Path,
        expected_dimension: Option<usize>,
    ) -> Result<ImportStats> {
        backup::import_backup(&self.pool, path, expected_dimension).await
    }

    /// Recompute communities from the relation graph
    pub async fn detect_communities(&self) -> Result<u32> {
        community::detect_communities(&self.pool).await
    }

    /// Rebuild all community-summary documents
    pub async fn build_community_summaries(
        &self,
        opts: &SummaryOptions<'_>,
    ) -> Result<SummaryStats> {
        self.check_embedder(opts.embed)?;
        community::build_community_summaries(&self.pool, opts).await
    }

    /// Answer a query community-by-community via summary documents
    pub async fn global_query(&self, opts: &GlobalQueryOptions<'_>) -> Result<GlobalAnswer> {
        self.check_embedder(opts.embed)?;
        community::global_query(&self.pool, opts).await
    }

    /// Close the pool. Safe to call more than once.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn check_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        if embedder.dimension() != self.config.dimension {
            return Err(Error::Config(format!(
                "embedder dimension {} does not match store dimension {}",
                embedder.dimension(),
                self.config.dimension
            )));
        }
        Ok(())
    }
}
