//! Content identity hashing
//!
//! Documents are identified by SHA-256(title ‖ content); chunks by
//! SHA-256 of their final (possibly transformed) text. These hashes back
//! the UNIQUE constraints that drive deduplication, so they must remain
//! stable across export/import.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a string
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity hash of a document: SHA-256 over title followed by content
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
