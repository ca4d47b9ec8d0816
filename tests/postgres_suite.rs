//! End-to-end tests against a live PostgreSQL instance with the
//! vectorscale and pg_textsearch extensions installed.
//!
//! These tests are ignored by default. To run them, point
//! `ARCHIVIST_TEST_DB` at a disposable database and use a single thread,
//! since every test rebuilds the schema:
//!
//! ```text
//! ARCHIVIST_TEST_DB=postgres://localhost/archivist_test \
//!     cargo test -- --ignored --test-threads=1
//! ```

use archivist::embed::Embedder;
use archivist::error::Result;
use archivist::ingest::IngestOptions;
use archivist::models::{DocumentInput, RelationTarget, SearchMode};
use archivist::search::{QueryMode, SearchOptions};
use archivist::{Archive, StoreConfig};
use async_trait::async_trait;
use std::collections::HashMap;

const DIMENSION: usize = 8;

/// Deterministic bag-of-bytes embedder: texts sharing words land close
/// together, disjoint vocabularies land far apart.
struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMENSION];
                for word in t.split_whitespace() {
                    let mut h = 0usize;
                    for b in word.bytes() {
                        h = h.wrapping_mul(31).wrapping_add(b as usize);
                    }
                    v[h % DIMENSION] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

async fn fresh_archive() -> Archive {
    let url = std::env::var("ARCHIVIST_TEST_DB")
        .expect("set ARCHIVIST_TEST_DB to run the postgres suite");
    let archive = Archive::connect(StoreConfig {
        connection_string: url,
        dimension: DIMENSION,
        text_config: "simple".to_string(),
    })
    .unwrap();
    archive.drop_schema().await.unwrap();
    archive.init().await.unwrap();
    archive
}

fn doc(title: &str, content: &str) -> DocumentInput {
    DocumentInput::new(title, content)
}

/// A paragraph long enough to survive the chunker's minimum size filter,
/// built from a distinctive vocabulary.
fn paragraph(words: &str) -> String {
    let mut out = String::new();
    while out.chars().count() < 120 {
        out.push_str(words);
        out.push(' ');
    }
    out.trim_end().to_string()
}

fn relations(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<RelationTarget>> {
    entries
        .iter()
        .map(|(source, targets)| {
            (
                source.to_string(),
                targets.iter().map(|t| RelationTarget::from(*t)).collect(),
            )
        })
        .collect()
}

#[tokio::test]
#[ignore]
async fn dedup_junction_shares_chunks_across_documents() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let shared = paragraph("the shared body of these two documents is identical");

    let first = archive
        .ingest(&[doc("First", &shared)], &IngestOptions::new(&embedder))
        .await
        .unwrap();
    assert_eq!(first.documents_inserted, 1);
    assert!(first.chunks_inserted > 0);

    let second = archive
        .ingest(&[doc("Second", &shared)], &IngestOptions::new(&embedder))
        .await
        .unwrap();
    assert_eq!(second.documents_inserted, 1);
    assert_eq!(second.chunks_inserted, 0);
    assert!(second.chunks_reused > 0);

    let (sources, chunks): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM chunk_sources), (SELECT COUNT(*) FROM chunks)",
    )
    .fetch_one(archive.pool())
    .await
    .unwrap();
    assert!(sources > chunks);
}

#[tokio::test]
#[ignore]
async fn reingesting_the_same_documents_is_idempotent() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let docs = vec![
        doc("One", &paragraph("first document about alpine meadows and streams")),
        doc("Two", &paragraph("second document about desert canyons and mesas")),
    ];

    archive
        .ingest(&docs, &IngestOptions::new(&embedder))
        .await
        .unwrap();
    let again = archive
        .ingest(&docs, &IngestOptions::new(&embedder))
        .await
        .unwrap();

    assert_eq!(again.documents_inserted, 0);
    assert_eq!(again.chunks_inserted, 0);
    assert_eq!(again.duplicates_skipped, docs.len() as u64);
}

#[tokio::test]
#[ignore]
async fn vector_threshold_above_best_score_empties_results() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    archive
        .ingest(
            &[doc("Doc", &paragraph("glaciers carve valleys slowly over millennia"))],
            &IngestOptions::new(&embedder),
        )
        .await
        .unwrap();

    let opts = SearchOptions {
        query: "glaciers carve valleys".to_string(),
        mode: QueryMode::Vector,
        ..SearchOptions::default()
    };
    let results = archive.retrieve(&embedder, &opts).await.unwrap();
    assert!(!results.is_empty());
    let best = results[0].score;

    let filtered = archive
        .retrieve(
            &embedder,
            &SearchOptions {
                threshold: Some(best + 0.001),
                ..opts
            },
        )
        .await
        .unwrap();
    assert!(filtered.is_empty());
}

#[tokio::test]
#[ignore]
async fn bm25_gibberish_query_matches_nothing() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    archive
        .ingest(
            &[doc("Doc", &paragraph("an ordinary english paragraph about rivers"))],
            &IngestOptions::new(&embedder),
        )
        .await
        .unwrap();

    let results = archive
        .retrieve(
            &embedder,
            &SearchOptions {
                query: "zzzzzzzzzz qqqqqqqqqq vvvvvvvvvv".to_string(),
                mode: QueryMode::Bm25,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
#[ignore]
async fn graph_expansion_is_bidirectional() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let docs = vec![
        doc("Alpha", &paragraph("wombats burrow beneath eucalyptus groves")),
        doc("Beta", &paragraph("lighthouses sweep beams across midnight harbors")),
    ];
    let opts = IngestOptions {
        relations: Some(relations(&[("Alpha", &["Beta"])])),
        ..IngestOptions::new(&embedder)
    };
    archive.ingest(&docs, &opts).await.unwrap();

    for (query, expanded_title) in [
        ("wombats burrow beneath eucalyptus groves", "Beta"),
        ("lighthouses sweep beams across midnight harbors", "Alpha"),
    ] {
        let results = archive
            .retrieve(
                &embedder,
                &SearchOptions {
                    query: query.to_string(),
                    mode: QueryMode::Vector,
                    graph_hops: 1,
                    limit: 1,
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(
            results
                .iter()
                .any(|r| r.mode == SearchMode::Graph && r.title == expanded_title),
            "expected graph result '{expanded_title}' for query '{query}'"
        );
    }
}

#[tokio::test]
#[ignore]
async fn graph_decay_ranks_nearer_hops_higher() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let docs = vec![
        doc("Root", &paragraph("origami cranes fold along precise creases")),
        doc("HopOne", &paragraph("tidal pools shelter anemones and starfish")),
        doc("HopTwo", &paragraph("meteor showers streak over quiet observatories")),
    ];
    let opts = IngestOptions {
        relations: Some(relations(&[("Root", &["HopOne"]), ("HopOne", &["HopTwo"])])),
        ..IngestOptions::new(&embedder)
    };
    archive.ingest(&docs, &opts).await.unwrap();

    let results = archive
        .retrieve(
            &embedder,
            &SearchOptions {
                query: "origami cranes fold along precise creases".to_string(),
                mode: QueryMode::Vector,
                graph_hops: 2,
                graph_decay: 0.5,
                limit: 1,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    let score_of = |title: &str| {
        results
            .iter()
            .find(|r| r.mode == SearchMode::Graph && r.title == title)
            .map(|r| r.score)
            .unwrap_or_else(|| panic!("missing graph result for {title}"))
    };
    assert!(score_of("HopOne") > score_of("HopTwo"));
}

#[tokio::test]
#[ignore]
async fn circular_relations_terminate() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let docs = vec![
        doc("A", &paragraph("accordion music drifts through cobbled alleys")),
        doc("B", &paragraph("beekeepers tend hives beside clover fields")),
        doc("C", &paragraph("cartographers ink coastlines onto vellum maps")),
    ];
    let opts = IngestOptions {
        relations: Some(relations(&[
            ("A", &["B"]),
            ("B", &["C"]),
            ("C", &["A"]),
        ])),
        ..IngestOptions::new(&embedder)
    };
    let stats = archive.ingest(&docs, &opts).await.unwrap();
    assert_eq!(stats.communities_detected, 1);

    let results = archive
        .retrieve(
            &embedder,
            &SearchOptions {
                query: "accordion music drifts through cobbled alleys".to_string(),
                mode: QueryMode::Vector,
                graph_hops: 5,
                limit: 1,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(results.iter().any(|r| r.mode == SearchMode::Graph));
}

#[tokio::test]
#[ignore]
async fn community_boost_adds_chunks_from_dominant_community() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let docs = vec![
        doc("X1", &paragraph("volcanic geysers erupt amid basalt plains")),
        doc("X2", &paragraph("thermal springs steam beside mineral terraces")),
        doc("Y1", &paragraph("submarine cables hum beneath abyssal trenches")),
        doc("Y2", &paragraph("sonar arrays ping across oceanic ridges")),
    ];
    let opts = IngestOptions {
        relations: Some(relations(&[("X1", &["X2"]), ("Y1", &["Y2"])])),
        ..IngestOptions::new(&embedder)
    };
    let stats = archive.ingest(&docs, &opts).await.unwrap();
    assert_eq!(stats.communities_detected, 2);

    let boost = 0.5f32;
    let rrf_k = 60.0f32;
    let results = archive
        .retrieve(
            &embedder,
            &SearchOptions {
                query: "volcanic geysers erupt amid basalt plains".to_string(),
                mode: QueryMode::Vector,
                community_boost: Some(boost),
                limit: 1,
                rrf_k,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    let boosted: Vec<_> = results
        .iter()
        .filter(|r| r.mode == SearchMode::Community)
        .collect();
    assert!(!boosted.is_empty());
    for r in &boosted {
        assert!(r.title.starts_with('X'), "boost leaked community: {}", r.title);
        assert!(r.score > 0.0);
        assert!(r.score <= boost / (rrf_k + 1.0));
    }
}

#[tokio::test]
#[ignore]
async fn backup_round_trip_preserves_corpus() {
    let archive = fresh_archive().await;
    let embedder = HashEmbedder;
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("corpus.jsonl");

    let docs = vec![
        doc("Alpha", &paragraph("falcons ride thermals above sandstone cliffs")),
        doc("Beta", &paragraph("monsoons drench terraced hillside paddies")),
    ];
    let opts = IngestOptions {
        relations: Some(relations(&[("Alpha", &["Beta"])])),
        ..IngestOptions::new(&embedder)
    };
    archive.ingest(&docs, &opts).await.unwrap();

    let exported = archive.export_backup(&path).await.unwrap();
    assert_eq!(exported.documents_exported, 2);

    let report = archive.validate_backup(&path).unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(
        report.dimensions.iter().copied().collect::<Vec<_>>(),
        vec![DIMENSION]
    );

    archive.drop_schema().await.unwrap();
    archive.init().await.unwrap();

    let imported = archive.import_backup(&path, Some(DIMENSION)).await.unwrap();
    assert_eq!(imported.documents_imported, 2);
    assert!(imported.warnings.is_empty());

    let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM documents ORDER BY title")
        .fetch_all(archive.pool())
        .await
        .unwrap();
    assert_eq!(titles, vec!["Alpha".to_string(), "Beta".to_string()]);

    let relation_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_relations")
        .fetch_one(archive.pool())
        .await
        .unwrap();
    assert_eq!(relation_count, 1);

    // Importing the same file again only reports duplicates.
    let again = archive.import_backup(&path, Some(DIMENSION)).await.unwrap();
    assert_eq!(again.documents_imported, 0);
    assert_eq!(again.duplicates_skipped, 2);
}

#[tokio::test]
async fn validate_backup_flags_mixed_dimensions() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("mixed.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"title":"A","content":"c","contentHash":"h1","chunks":[{"text":"t","embedding":[0.1,0.2],"startIndex":0,"endIndex":1,"tokenCount":1}]}"#,
            "\n",
            r#"{"title":"B","content":"c","contentHash":"h2","chunks":[{"text":"t","embedding":[0.1,0.2,0.3],"startIndex":0,"endIndex":1,"tokenCount":1}]}"#,
            "\n",
        ),
    )
    .unwrap();

    // Lazy pool: no database needed for validation.
    let archive = Archive::connect(StoreConfig {
        connection_string: "postgres://localhost/unused".to_string(),
        dimension: DIMENSION,
        text_config: "simple".to_string(),
    })
    .unwrap();

    let report = archive.validate_backup(&path).unwrap();
    assert!(!report.valid);
    assert_eq!(report.dimensions.len(), 2);
    assert!(report.errors.is_empty());
}
