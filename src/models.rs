//! Shared data types: documents, search results, relations, and operation stats

use serde::{Deserialize, Serialize};

/// A document handed to the ingest pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub title: String,
    pub content: String,

    /// Arbitrary JSON object stored alongside the document
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

impl DocumentInput {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            metadata: default_metadata(),
        }
    }
}

/// How a search result entered the result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Bm25,
    Graph,
    Community,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Vector => write!(f, "vector"),
            SearchMode::Bm25 => write!(f, "bm25"),
            SearchMode::Graph => write!(f, "graph"),
            SearchMode::Community => write!(f, "community"),
        }
    }
}

/// A single retrieved chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk id
    pub id: i64,
    /// Source document id (newest source when the chunk is shared)
    pub document_id: i64,
    pub title: String,
    pub text: String,
    pub score: f32,
    pub mode: SearchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i32>,
    /// Relation type of the best path, for graph-expanded results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
}

/// A relation target as accepted from callers and backup files.
///
/// Either a bare title string (weight 1, no type) or a detailed object.
/// Both forms normalize into [`RelationSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationTarget {
    Title(String),
    Detailed {
        title: String,
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        rel_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<f32>,
    },
}

/// Normalized relation target
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSpec {
    pub title: String,
    pub rel_type: Option<String>,
    pub weight: Option<f32>,
}

impl RelationTarget {
    /// Normalize both accepted forms into a single shape
    pub fn normalize(&self) -> RelationSpec {
        match self {
            RelationTarget::Title(title) => RelationSpec {
                title: title.clone(),
                rel_type: None,
                weight: None,
            },
            RelationTarget::Detailed {
                title,
                rel_type,
                weight,
            } => RelationSpec {
                title: title.clone(),
                rel_type: rel_type.clone(),
                weight: *weight,
            },
        }
    }
}

impl From<&str> for RelationTarget {
    fn from(title: &str) -> Self {
        RelationTarget::Title(title.to_string())
    }
}

/// A relation edge rendered with document titles, for context building
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source_title: String,
    pub target_title: String,
    pub rel_type: Option<String>,
}

/// Result counters from an ingest call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub documents_inserted: u64,
    pub duplicates_skipped: u64,
    pub chunks_inserted: u64,
    pub chunks_reused: u64,
    pub relations_inserted: u64,
    /// Deduplicated relation target titles that resolved to no document
    pub unresolved_relations: Vec<String>,
    pub communities_detected: u32,
}

/// Result of a backup export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStats {
    pub documents_exported: u64,
    pub output_path: String,
}

/// Result of a backup import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportStats {
    pub documents_imported: u64,
    pub chunks_inserted: u64,
    pub duplicates_skipped: u64,
    pub warnings: Vec<String>,
}

/// Result of building community summaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub communities_processed: u64,
    pub summaries_generated: u64,
}

/// A member document handed to the caller's summarizer
#[derive(Debug, Clone)]
pub struct CommunityMember {
    pub title: String,
    pub content: String,
}

/// One community's contribution to a global query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialAnswer {
    pub community_id: i32,
    pub answer: String,
}

/// Result of a global (community-routed) query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAnswer {
    pub answer: String,
    pub partial_answers: Vec<PartialAnswer>,
}

/// Result of the composed `query` facade operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub context: String,
    pub results: Vec<SearchResult>,
}
