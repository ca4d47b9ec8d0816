//! Hierarchical text chunking
//!
//! This module splits document text into retrieval-sized chunks while:
//! - Unwrapping hard line breaks that are not structural (markdown aware)
//! - Splitting at the strongest boundary available, recursively
//! - Merging adjacent pieces back up to the chunk size
//! - Filtering out fragments and OCR garbage
//! - Recovering character offsets into the normalized text
//!
//! All sizes and offsets are measured in characters; the text itself is
//! preserved byte-for-byte apart from the caller-supplied `normalize`.

mod split;

pub use split::unwrap_hard_breaks;

use split::{byte_index_of_char, char_len, join_separator, split_recursive};
use std::sync::Arc;

/// Minimum chunk length; shorter fragments carry too little signal to embed
const MIN_CHUNK_CHARS: usize = 50;

/// A non-whitespace run at least this long marks OCR garbage
const MAX_NON_WS_RUN: usize = 200;

/// How many leading characters of a chunk are used to locate its offset
const OFFSET_NEEDLE_CHARS: usize = 80;

/// How far before the previous chunk's end the offset search may begin
const OFFSET_SEARCH_SLACK: usize = 10;

/// Caller-supplied text normalization applied before chunking
pub type NormalizeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Chunking parameters
#[derive(Clone, Default)]
pub struct ChunkOptions {
    /// Maximum chunk length in characters (0 means the default of 2048)
    pub chunk_size: usize,

    /// Characters of the previous chunk prefixed onto each following chunk
    pub overlap: usize,

    /// Optional pure text transform run before anything else
    pub normalize: Option<NormalizeFn>,
}

impl std::fmt::Debug for ChunkOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkOptions")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .field("normalize", &self.normalize.is_some())
            .finish()
    }
}

impl ChunkOptions {
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            crate::config::default_chunk_size()
        } else {
            self.chunk_size
        }
    }
}

/// A chunk with its location in the normalized document text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,

    /// Character offset where this chunk starts
    pub start_index: usize,

    /// Character offset one past the end of this chunk
    pub end_index: usize,

    /// Chunk length in characters
    pub token_count: usize,
}

/// Chunk a document's text into ordered, offset-annotated chunks.
pub fn chunk(text: &str, opts: &ChunkOptions) -> Vec<TextChunk> {
    let chunk_size = opts.effective_chunk_size();

    let normalized = match &opts.normalize {
        Some(f) => f(text),
        None => text.to_string(),
    };
    let working = unwrap_hard_breaks(&normalized);

    let pieces: Vec<String> = split_recursive(&working, 0, chunk_size)
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let merged = merge_pieces(pieces, chunk_size);
    let overlapped = apply_overlap(merged, opts.overlap);

    let kept: Vec<String> = overlapped
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| char_len(c) >= MIN_CHUNK_CHARS)
        .filter(|c| !has_long_non_ws_run(c))
        .collect();

    recover_offsets(&working, kept)
}

/// Greedily merge adjacent pieces while the combination stays within the
/// chunk size.
fn merge_pieces(pieces: Vec<String>, chunk_size: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if current.is_empty() {
            current = piece;
            continue;
        }

        let sep = join_separator(&current, &piece);
        if char_len(&current) + sep.len() + char_len(&piece) <= chunk_size {
            current.push_str(sep);
            current.push_str(&piece);
        } else {
            merged.push(std::mem::replace(&mut current, piece));
        }
    }

    if !current.is_empty() {
        merged.push(current);
    }

    merged
}

/// Prefix each chunk after the first with the tail of its predecessor.
fn apply_overlap(chunks: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
            continue;
        }

        let prev = &chunks[i - 1];
        let prev_len = char_len(prev);
        let tail_start = byte_index_of_char(prev, prev_len.saturating_sub(overlap));
        let tail = &prev[tail_start..];

        let sep = join_separator(tail, chunk);
        out.push(format!("{tail}{sep}{chunk}"));
    }

    out
}

/// True when the text contains a run of at least [`MAX_NON_WS_RUN`]
/// consecutive non-whitespace characters.
fn has_long_non_ws_run(text: &str) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            run = 0;
        } else {
            run += 1;
            if run >= MAX_NON_WS_RUN {
                return true;
            }
        }
    }
    false
}

/// Locate each chunk in the working text by searching for its leading
/// characters near the previous chunk's end.
fn recover_offsets(working: &str, chunks: Vec<String>) -> Vec<TextChunk> {
    let mut out = Vec::with_capacity(chunks.len());
    let mut prev_end = 0usize;

    for text in chunks {
        let needle_end = byte_index_of_char(&text, OFFSET_NEEDLE_CHARS);
        let needle = &text[..needle_end];

        let from = prev_end.saturating_sub(OFFSET_SEARCH_SLACK);
        let start = find_chars(working, needle, from)
            .or_else(|| find_chars(working, needle, 0))
            .unwrap_or(prev_end);

        let token_count = char_len(&text);
        let end = start + token_count;
        prev_end = end;

        out.push(TextChunk {
            text,
            start_index: start,
            end_index: end,
            token_count,
        });
    }

    out
}

/// Find `needle` in `haystack` at or after character offset `from`,
/// returning the match's character offset.
fn find_chars(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let from_byte = byte_index_of_char(haystack, from);
    let found = haystack[from_byte..].find(needle)?;
    Some(from + char_len(&haystack[from_byte..from_byte + found]))
}
