//! Line unwrapping and hierarchical splitting for the chunker
//!
//! Splitting walks a fixed ladder of boundary levels, from markdown
//! headers down to bare whitespace, descending only when a level fails
//! to break the text. All patterns are compiled once.

use regex::Regex;
use std::sync::LazyLock;

/// Markdown ATX header at line start
static HEADER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s").unwrap());

/// List/blockquote/table marker at line start
static LIST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*>|]|^\d+\.\s").unwrap());

/// Header boundary inside a block: the newline immediately before a header
static HEADER_BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n#{1,6}\s").unwrap());

/// Paragraph boundary: one or more blank lines
static BLANK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\n+").unwrap());

/// Any whitespace run
static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Character length of a string (chunk sizes and offsets are char-based)
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of the nth character, clamped to the end of the string
pub fn byte_index_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// True when the newline between `line` and `next` must be kept: a blank
/// line on either side, or `next` opening a header or list item.
fn is_structural_break(line: &str, next: &str) -> bool {
    line.trim().is_empty()
        || next.trim().is_empty()
        || HEADER_LINE_RE.is_match(next)
        || LIST_LINE_RE.is_match(next)
}

/// Replace single hard line breaks with spaces, keeping structural ones.
///
/// Double newlines survive untouched because the blank line between them
/// makes both boundaries structural.
pub fn unwrap_hard_breaks(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len());

    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        if i + 1 < lines.len() {
            if is_structural_break(line, lines[i + 1]) {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
    }

    out
}

/// Split levels in descending structural priority. A level that produces a
/// single piece falls through to the next.
const LEVEL_COUNT: usize = 6;

/// Split `text` at one level. Returned pieces are untrimmed; separators at
/// levels 1-5 are consumed, level 0 keeps the boundary newline with the
/// right-hand piece.
fn split_at_level(text: &str, level: usize) -> Vec<String> {
    match level {
        // Before markdown headers
        0 => {
            let mut pieces = Vec::new();
            let mut cursor = 0;
            for m in HEADER_BOUNDARY_RE.find_iter(text) {
                if m.start() > cursor {
                    pieces.push(text[cursor..m.start()].to_string());
                }
                cursor = m.start();
            }
            pieces.push(text[cursor..].to_string());
            pieces
        }
        // Blank lines
        1 => {
            let mut pieces = Vec::new();
            let mut cursor = 0;
            for m in BLANK_LINE_RE.find_iter(text) {
                pieces.push(text[cursor..m.start()].to_string());
                cursor = m.end();
            }
            pieces.push(text[cursor..].to_string());
            pieces
        }
        // Whitespace after sentence punctuation
        2 => split_after_punctuation(text, &['.', '!', '?']),
        // Whitespace after clause punctuation
        3 => split_after_punctuation(text, &[';', ',']),
        // Single newlines
        4 => text.split('\n').map(str::to_string).collect(),
        // Any whitespace
        _ => WS_RUN_RE.split(text).map(str::to_string).collect(),
    }
}

/// Split at whitespace runs immediately preceded by one of `punct`,
/// consuming the whitespace and keeping the punctuation on the left piece.
fn split_after_punctuation(text: &str, punct: &[char]) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut cursor = 0;

    for m in WS_RUN_RE.find_iter(text) {
        if m.start() == 0 || m.start() < cursor {
            continue;
        }
        let preceded = text[..m.start()]
            .chars()
            .next_back()
            .map(|c| punct.contains(&c))
            .unwrap_or(false);
        if preceded {
            pieces.push(text[cursor..m.start()].to_string());
            cursor = m.end();
        }
    }

    pieces.push(text[cursor..].to_string());
    pieces
}

/// Recursively split until every piece fits in `chunk_size` characters or
/// no level applies. Oversized unsplittable pieces are returned as-is; the
/// post-chunk filters discard them.
pub fn split_recursive(text: &str, level: usize, chunk_size: usize) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }
    if level >= LEVEL_COUNT {
        return vec![text.to_string()];
    }

    let pieces = split_at_level(text, level);
    if pieces.len() <= 1 {
        return split_recursive(text, level + 1, chunk_size);
    }

    pieces
        .iter()
        .flat_map(|piece| split_recursive(piece, level + 1, chunk_size))
        .collect()
}

/// Separator used when joining two pieces: a newline when the left side
/// ends in one or the right side opens a header, a space otherwise.
pub fn join_separator(left: &str, right: &str) -> &'static str {
    if left.ends_with('\n') || right.starts_with('#') {
        "\n"
    } else {
        " "
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_single_breaks() {
        assert_eq!(unwrap_hard_breaks("one line\nwrapped here"), "one line wrapped here");
    }

    #[test]
    fn test_unwrap_keeps_double_newlines() {
        assert_eq!(unwrap_hard_breaks("para one\n\npara two"), "para one\n\npara two");
    }

    #[test]
    fn test_unwrap_keeps_header_and_list_breaks() {
        assert_eq!(
            unwrap_hard_breaks("intro\n# Title\ntext"),
            "intro\n# Title text"
        );
        assert_eq!(
            unwrap_hard_breaks("intro\n- item one\n- item two"),
            "intro\n- item one\n- item two"
        );
        assert_eq!(
            unwrap_hard_breaks("intro\n1. first\n2. second"),
            "intro\n1. first\n2. second"
        );
    }

    #[test]
    fn test_split_headers_keep_marker() {
        let pieces = split_at_level("before\n# One\nbody\n## Two\nmore", 0);
        assert_eq!(pieces.len(), 3);
        assert!(pieces[1].starts_with("\n# One"));
        assert!(pieces[2].starts_with("\n## Two"));
    }

    #[test]
    fn test_split_blank_lines_consumes_separator() {
        let pieces = split_at_level("a\n\nb\n\n\nc", 1);
        assert_eq!(pieces, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_sentences() {
        let pieces = split_at_level("First. Second! Third? Tail", 2);
        assert_eq!(pieces, vec!["First.", "Second!", "Third?", "Tail"]);
    }

    #[test]
    fn test_split_clauses() {
        let pieces = split_at_level("alpha, beta; gamma", 3);
        assert_eq!(pieces, vec!["alpha,", "beta;", "gamma"]);
    }

    #[test]
    fn test_recursive_split_falls_through_levels() {
        // No headers, no blank lines: should fall to sentence level.
        let text = "Sentence one is right here. Sentence two follows it.";
        let pieces = split_recursive(text, 0, 30);
        assert_eq!(pieces.len(), 2);
    }

    #[test]
    fn test_recursive_split_unsplittable_piece_passes_through() {
        let blob = "x".repeat(300);
        let pieces = split_recursive(&blob, 0, 100);
        assert_eq!(pieces.len(), 1);
        assert_eq!(char_len(&pieces[0]), 300);
    }

    #[test]
    fn test_join_separator_rules() {
        assert_eq!(join_separator("plain text", "more text"), " ");
        assert_eq!(join_separator("plain text", "# Header"), "\n");
        assert_eq!(join_separator("ends in newline\n", "more"), "\n");
    }

    #[test]
    fn test_char_helpers_multibyte() {
        let text = "héllo wörld";
        assert_eq!(char_len(text), 11);
        assert_eq!(byte_index_of_char(text, 1), 1);
        assert_eq!(&text[byte_index_of_char(text, 6)..], "wörld");
    }
}
