//! Line-delimited JSON backup format
//!
//! One document per line, UTF-8, `\n` terminated. Keys are camelCase.
//! `relations` entries may be bare title strings or objects; readers accept
//! both, the writer always emits objects and omits `weight` at its default
//! of 1.0.

use crate::error::Result;
use crate::models::{RelationSpec, RelationTarget};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One document line of a backup file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub title: String,
    pub content: String,
    pub content_hash: String,

    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i32>,

    #[serde(default)]
    pub chunks: Vec<BackupChunk>,

    #[serde(default)]
    pub relations: Vec<RelationTarget>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// One chunk occurrence within a backup line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub start_index: i32,
    pub end_index: i32,
    pub token_count: i32,
}

/// Convert a normalized relation into its backup representation, dropping
/// the default weight.
pub fn relation_for_backup(spec: &RelationSpec) -> RelationTarget {
    RelationTarget::Detailed {
        title: spec.title.clone(),
        rel_type: spec.rel_type.clone(),
        weight: spec.weight.filter(|w| *w != 1.0),
    }
}

/// Truncate (or create) the backup file
pub fn truncate_backup(path: &Path) -> Result<()> {
    File::create(path)?;
    Ok(())
}

/// Append one document line, flushing before returning
pub fn append_backup_line(path: &Path, doc: &BackupDocument) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(doc)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// Read all non-empty lines of a backup file
pub fn read_backup_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_doc() -> BackupDocument {
        BackupDocument {
            title: "Doc".to_string(),
            content: "Body".to_string(),
            content_hash: "abc123".to_string(),
            metadata: serde_json::json!({"lang": "en"}),
            community_id: Some(2),
            chunks: vec![BackupChunk {
                text: "Body".to_string(),
                embedding: vec![0.1, 0.2],
                start_index: 0,
                end_index: 4,
                token_count: 4,
            }],
            relations: vec![relation_for_backup(&RelationSpec {
                title: "Other".to_string(),
                rel_type: Some("cites".to_string()),
                weight: Some(1.0),
            })],
        }
    }

    #[test]
    fn test_line_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backup.jsonl");

        truncate_backup(&path).unwrap();
        append_backup_line(&path, &sample_doc()).unwrap();
        append_backup_line(&path, &sample_doc()).unwrap();

        let lines = read_backup_lines(&path).unwrap();
        assert_eq!(lines.len(), 2);

        let parsed: BackupDocument = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed.title, "Doc");
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.community_id, Some(2));
    }

    #[test]
    fn test_keys_are_camel_case_and_default_weight_omitted() {
        let json = serde_json::to_string(&sample_doc()).unwrap();
        assert!(json.contains("\"contentHash\""));
        assert!(json.contains("\"startIndex\""));
        assert!(json.contains("\"tokenCount\""));
        assert!(json.contains("\"communityId\""));
        // weight 1.0 is the default and must not be serialized
        assert!(!json.contains("\"weight\""));
        assert!(json.contains("\"type\":\"cites\""));
    }

    #[test]
    fn test_reader_accepts_string_relations() {
        let line = r#"{"title":"T","content":"C","contentHash":"h","chunks":[],"relations":["A",{"title":"B","weight":0.5}]}"#;
        let doc: BackupDocument = serde_json::from_str(line).unwrap();

        let specs: Vec<_> = doc.relations.iter().map(|r| r.normalize()).collect();
        assert_eq!(specs[0].title, "A");
        assert_eq!(specs[0].weight, None);
        assert_eq!(specs[1].title, "B");
        assert_eq!(specs[1].weight, Some(0.5));
    }

    #[test]
    fn test_truncate_discards_previous_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backup.jsonl");

        append_backup_line(&path, &sample_doc()).unwrap();
        truncate_backup(&path).unwrap();

        assert!(read_backup_lines(&path).unwrap().is_empty());
    }
}
