//! Overlapping window chunker.
//!
//! Splits document text into [`Chunk`]s no longer than a configurable
//! `max_tokens` limit, with `overlap_tokens` of shared text between
//! neighbours so that a sentence straddling a boundary is fully contained
//! in at least one chunk.
//!
//! Each chunk is a byte-exact slice of the document. Its identity is a
//! UUIDv5 of `(document_uri, chunk_index)` and it carries a SHA-256 hash of
//! its text for dedup in the indexer.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` / `overlap_tokens` to chars using a 4 chars/token ratio.
//! 2. If the whole text fits in one window, return it as a single chunk.
//! 3. Otherwise cut the window at the last paragraph break (`\n\n`), then the
//!    last newline, then the last whitespace that lies past the overlap
//!    region. Fall back to a hard cut at the window edge.
//! 4. Start the next window `overlap` chars before the cut, advanced to the
//!    next word start if that does not eat the whole overlap.
//! 5. A window holding only whitespace is not emitted; the next window starts
//!    at the following non-whitespace char.
//!
//! # Example
//!
//! ```rust
//! use docs_index_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams { max_tokens: 250, overlap_tokens: 25 };
//! let chunks = chunk_text("file:///docs/intro.md", "Hello world.\n\nSecond paragraph.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use crate::error::{IndexError, Result};
use crate::models::{chunk_id, content_hash, Chunk, Document};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Window size and overlap, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkingParams {
    pub fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(CHARS_PER_TOKEN)
    }

    /// Overlap in chars, clamped below the window size.
    pub fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * CHARS_PER_TOKEN).min(self.max_chars() - 1)
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_tokens: 250,
            overlap_tokens: 25,
        }
    }
}

/// Chunk a fetched document, rejecting content that cannot be embedded.
///
/// # Errors
///
/// [`IndexError::Malformed`] if the text is empty/whitespace-only or
/// contains NUL bytes (binary content decoded as text).
pub fn chunk_document(doc: &Document, params: &ChunkingParams) -> Result<Vec<Chunk>> {
    if doc.text.contains('\0') {
        return Err(IndexError::malformed(
            &doc.uri,
            "contains NUL bytes (binary content)",
        ));
    }
    if doc.text.trim().is_empty() {
        return Err(IndexError::malformed(&doc.uri, "document has no text"));
    }
    Ok(chunk_text(&doc.uri, &doc.text, params))
}

/// Split text into overlapping chunks with contiguous indices from 0.
///
/// # Guarantees
///
/// - Text no longer than the window yields exactly one chunk equal to it.
/// - Every chunk is at most `max_chars` bytes.
/// - With overlap > 0, each chunk starts strictly before its predecessor
///   ends, unless only whitespace lies between them.
/// - Every non-whitespace char lies in at least one chunk.
/// - Output depends only on `text` and `params`.
pub fn chunk_text(document_uri: &str, text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    let max_chars = params.max_chars();
    let overlap = params.overlap_chars();

    if text.len() <= max_chars {
        return vec![make_chunk(document_uri, 0, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = snap_to_char_boundary(text, start + max_chars).max(next_boundary(text, start));

        if hard_end >= text.len() {
            let piece = &text[start..];
            if chunks.is_empty() || !piece.trim().is_empty() {
                chunks.push(make_chunk(
                    document_uri,
                    chunks.len() as i64,
                    start,
                    piece,
                ));
            }
            break;
        }

        let end = find_break(text, start + overlap, hard_end).unwrap_or(hard_end);
        let piece = &text[start..end];
        if piece.trim().is_empty() {
            match text[end..].char_indices().find(|(_, c)| !c.is_whitespace()) {
                Some((p, _)) => {
                    start = end + p;
                    continue;
                }
                None => break,
            }
        }
        chunks.push(make_chunk(document_uri, chunks.len() as i64, start, piece));

        start = next_start(text, start, end, overlap);
    }

    chunks
}

/// Find the best cut in `text[min_end..hard_end]`, returning an absolute
/// position strictly greater than `min_end`.
fn find_break(text: &str, min_end: usize, hard_end: usize) -> Option<usize> {
    let lo = ceil_char_boundary(text, min_end);
    if lo >= hard_end {
        return None;
    }
    let window = &text[lo..hard_end];
    window
        .rfind("\n\n")
        .map(|p| p + 2)
        .or_else(|| window.rfind('\n').map(|p| p + 1))
        .or_else(|| {
            window
                .char_indices()
                .filter(|(_, c)| c.is_whitespace())
                .last()
                .map(|(p, c)| p + c.len_utf8())
        })
        .map(|p| lo + p)
}

/// Where the window after `[start, end)` begins.
fn next_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let mut s = snap_to_char_boundary(text, end - overlap);
    if s <= start {
        s = next_boundary(text, start);
    }
    // Mid-word: move to the next word start, as long as some overlap remains.
    let mid_word = text[..s]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    if mid_word {
        if let Some((p, c)) = text[s..end].char_indices().find(|(_, c)| c.is_whitespace()) {
            let candidate = s + p + c.len_utf8();
            if candidate < end {
                return candidate;
            }
        }
    }
    s
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Byte index of the char boundary after the char at `index`.
fn next_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}

fn make_chunk(document_uri: &str, index: i64, start: usize, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(document_uri, index),
        document_uri: document_uri.to_string(),
        chunk_index: index,
        start,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
