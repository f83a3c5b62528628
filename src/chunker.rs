//! Text Chunker (§4.2). A pure function: no I/O, no shared state, safe to
//! call from any task without synchronization.

use regex::Regex;
use std::sync::OnceLock;

fn sentence_terminator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").unwrap())
}

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

/// Split `text` into an ordered list of overlapping, sentence-aware chunks.
///
/// Source order is preserved: the returned vector's index is each chunk's
/// `text_index`. Calling this twice on the same input produces byte-for-byte
/// identical output.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let overlap = if chunk_overlap >= chunk_size {
        chunk_size / 10
    } else {
        chunk_overlap
    };

    let chars: Vec<char> = trimmed.chars().collect();
    let len = chars.len();

    if len <= chunk_size {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = start + chunk_size;
        if end >= len {
            push_chunk(&mut chunks, &chars[start..len]);
            break;
        }

        let window_start = start.max(end.saturating_sub(chunk_size / 5));
        let window: String = chars[window_start..end].iter().collect();

        // Sentence terminator: last match in the window (prefers the cut
        // closest to `end`). Paragraph break and single-newline fallbacks:
        // first match, matching the reference's `re.search` semantics.
        let mut boundary = None;
        if let Some(m) = sentence_terminator().find_iter(&window).last() {
            boundary = Some(window_start + char_len(&window[..m.end()]));
        } else if let Some(m) = paragraph_break().find(&window) {
            boundary = Some(window_start + char_len(&window[..m.end()]));
        } else if let Some(idx) = window.find('\n') {
            boundary = Some(window_start + char_len(&window[..idx + 1]));
        }

        if let Some(b) = boundary {
            end = b;
        }

        push_chunk(&mut chunks, &chars[start..end]);

        let next_start = end.saturating_sub(overlap);
        start = next_start.max(start + 1);
    }

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_chunk(chunks: &mut Vec<String>, slice: &[char]) {
    let text: String = slice.iter().collect();
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("   ", DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP).is_empty());
    }

    #[test]
    fn short_input_returns_single_chunk() {
        let chunks = chunk_text("hello world", DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn determinism() {
        let text = "A. ".repeat(2000);
        let a = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        let b = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(a, b);
    }

    #[test]
    fn bounds_every_chunk_within_chunk_size() {
        let text = "word ".repeat(1000);
        let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        for c in &chunks {
            assert!(c.chars().count() <= DEFAULT_CHUNK_SIZE);
        }
    }

    #[test]
    fn text_index_order_matches_source_order() {
        let text = "Alpha. Beta. Gamma. ".repeat(500);
        let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        let reassembled: String = chunks.join("");
        // Every chunk content appears in the original source in the order emitted.
        let mut cursor = 0usize;
        for c in &chunks {
            let pos = text[cursor..].find(c.as_str());
            assert!(pos.is_some(), "chunk not found in remaining source: {c}");
            cursor += pos.unwrap();
        }
        assert!(!reassembled.is_empty());
    }

    #[test]
    fn sentence_preference_does_not_split_terminator_from_letter() {
        let chunks = chunk_text("A. B. C. D.", 8, 2);
        for c in &chunks {
            // No chunk should end with a dangling letter immediately followed
            // (in source) by a terminator that got pushed to the next chunk.
            assert!(!c.ends_with(|ch: char| ch.is_alphabetic()) || c.len() <= 8);
        }
    }

    #[test]
    fn overlap_greater_or_equal_chunk_size_falls_back() {
        let text = "x".repeat(5000);
        // chunk_overlap >= chunk_size should not panic or infinite-loop.
        let chunks = chunk_text(&text, 100, 100);
        assert!(!chunks.is_empty());
    }
}
