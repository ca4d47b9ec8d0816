//! Deterministic prompt-context builders
//!
//! Exposed publicly so callers can reproduce exactly the context strings
//! the facade feeds to answer generators.

use crate::models::{RelationEdge, SearchResult};

/// Render results as a numbered context block:
/// `[1] <title>\n<text>\n\n[2] ...` with trailing whitespace trimmed.
pub fn build_context(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n{}\n\n", i + 1, r.title, r.text));
    }
    out.trim_end().to_string()
}

/// Like [`build_context`], but prefixed with a relation header block when
/// any relations are present. With no relations the output is exactly
/// `build_context(results)`.
pub fn build_graph_context(results: &[SearchResult], relations: &[RelationEdge]) -> String {
    if relations.is_empty() {
        return build_context(results);
    }

    let mut out = String::from("=== Document Relations ===\n");
    for edge in relations {
        match &edge.rel_type {
            Some(t) => out.push_str(&format!(
                "{} → {} [{}]\n",
                edge.source_title, edge.target_title, t
            )),
            None => out.push_str(&format!("{} → {}\n", edge.source_title, edge.target_title)),
        }
    }
    out.push('\n');
    out.push_str(&build_context(results));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchMode;

    fn result(title: &str, text: &str) -> SearchResult {
        SearchResult {
            id: 1,
            document_id: 1,
            title: title.to_string(),
            text: text.to_string(),
            score: 1.0,
            mode: SearchMode::Vector,
            community_id: None,
            relation_type: None,
        }
    }

    #[test]
    fn test_build_context_numbers_and_trims() {
        let results = vec![result("Doc A", "alpha text"), result("Doc B", "bravo text")];
        assert_eq!(
            build_context(&results),
            "[1] Doc A\nalpha text\n\n[2] Doc B\nbravo text"
        );
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_graph_context_without_relations_matches_plain() {
        let results = vec![result("Doc A", "alpha text")];
        assert_eq!(
            build_graph_context(&results, &[]),
            build_context(&results)
        );
    }

    #[test]
    fn test_graph_context_renders_relation_lines() {
        let results = vec![result("Doc A", "alpha text")];
        let relations = vec![
            RelationEdge {
                source_title: "Doc A".to_string(),
                target_title: "Doc B".to_string(),
                rel_type: Some("cites".to_string()),
            },
            RelationEdge {
                source_title: "Doc B".to_string(),
                target_title: "Doc C".to_string(),
                rel_type: None,
            },
        ];

        let out = build_graph_context(&results, &relations);
        assert!(out.starts_with("=== Document Relations ===\n"));
        assert!(out.contains("Doc A → Doc B [cites]\n"));
        assert!(out.contains("Doc B → Doc C\n"));
        assert!(out.ends_with("[1] Doc A\nalpha text"));
    }
}
