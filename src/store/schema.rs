//! PostgreSQL schema definition
//!
//! Table and index names are part of the crate's contract: backups, the
//! graph walk, and external tooling all address them directly.

/// DDL for the four core relations plus extensions and indexes.
///
/// `{dimension}` and `{text_config}` are substituted by [`render_schema_sql`].
const SCHEMA_SQL_TEMPLATE: &str = r#"
CREATE EXTENSION IF NOT EXISTS vectorscale CASCADE;
CREATE EXTENSION IF NOT EXISTS pg_textsearch CASCADE;

-- Documents: ingested units, identified by content hash
CREATE TABLE IF NOT EXISTS documents (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}',
    community_id INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Chunks: deduplicated embedded text, shared across documents
CREATE TABLE IF NOT EXISTS chunks (
    id BIGSERIAL PRIMARY KEY,
    text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    embedding VECTOR({dimension}) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Junction: where each chunk occurs in each document. A pair may repeat
-- when the same text occurs at multiple offsets of one document.
CREATE TABLE IF NOT EXISTS chunk_sources (
    id BIGSERIAL PRIMARY KEY,
    chunk_id BIGINT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    start_index INTEGER NOT NULL,
    end_index INTEGER NOT NULL
);

-- Relation graph between documents, undirected for traversal
CREATE TABLE IF NOT EXISTS document_relations (
    id BIGSERIAL PRIMARY KEY,
    source_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    target_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    rel_type TEXT,
    weight REAL DEFAULT 1.0,
    UNIQUE(source_id, target_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_community ON documents(community_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_text_hash ON chunks(text_hash);
CREATE INDEX IF NOT EXISTS idx_chunk_sources_chunk ON chunk_sources(chunk_id);
CREATE INDEX IF NOT EXISTS idx_chunk_sources_document ON chunk_sources(document_id);
CREATE INDEX IF NOT EXISTS idx_document_relations_source ON document_relations(source_id);
CREATE INDEX IF NOT EXISTS idx_document_relations_target ON document_relations(target_id);

CREATE INDEX IF NOT EXISTS idx_chunks_embedding
    ON chunks USING diskann (embedding vector_cosine_ops);
CREATE INDEX IF NOT EXISTS idx_chunks_text_bm25
    ON chunks USING bm25 (text) WITH (text_config = '{text_config}');
"#;

/// SQL to tear the schema down
pub const DROP_SQL: &str = r#"
DROP TABLE IF EXISTS chunk_sources CASCADE;
DROP TABLE IF EXISTS document_relations CASCADE;
DROP TABLE IF EXISTS chunks CASCADE;
DROP TABLE IF EXISTS documents CASCADE;
"#;

/// Render the schema DDL for a given embedding dimension and BM25 text
/// configuration. Both values come from a validated [`StoreConfig`].
///
/// [`StoreConfig`]: crate::config::StoreConfig
pub fn render_schema_sql(dimension: usize, text_config: &str) -> String {
    SCHEMA_SQL_TEMPLATE
        .replace("{dimension}", &dimension.to_string())
        .replace("{text_config}", text_config)
}
