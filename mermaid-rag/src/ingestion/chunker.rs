//! Recursive character-boundary chunking with source offsets.
//!
//! Documents are split at paragraph boundaries first, then line boundaries,
//! then word boundaries, falling back to raw character cuts, so every chunk
//! stays within the configured maximum. Consecutive chunks from one document
//! overlap so no information is lost at chunk edges.

use std::collections::VecDeque;

use crate::error::RetrievalError;
use crate::types::{Chunk, Document};

/// Boundary hierarchy, coarsest first. Anything that survives all three
/// levels is cut at raw character positions.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// A piece of a chunk span: character range `[start, end)` into the source.
type Piece = (usize, usize);

/// One chunk cut from a single text, before metadata is attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Character offset of `content` in the source text.
    pub start: usize,
    pub content: String,
}

/// Splits documents into overlapping, bounded-length chunks.
///
/// Output is deterministic for fixed input and parameters. Offsets and
/// lengths are measured in characters, not bytes.
#[derive(Clone, Debug)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RetrievalError> {
        if chunk_size == 0 {
            return Err(RetrievalError::Config(
                "chunk_size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RetrievalError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits every document, carrying metadata and per-document chunk order.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for document in documents {
            for (chunk_index, span) in self.split_text(&document.content).into_iter().enumerate() {
                chunks.push(Chunk {
                    content: span.content,
                    metadata: document.metadata.clone(),
                    start_index: span.start,
                    chunk_index,
                });
            }
        }
        chunks
    }

    /// Splits one text into spans of at most `chunk_size` characters.
    pub fn split_text(&self, text: &str) -> Vec<ChunkSpan> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        self.segment(&chars, 0, chars.len(), 0, &mut pieces);
        self.merge(&chars, &pieces)
    }

    /// Recursively cuts `[start, end)` into pieces no longer than
    /// `chunk_size`, preferring the coarsest boundary that applies. Pieces
    /// are contiguous: their concatenation is exactly the input range.
    fn segment(
        &self,
        chars: &[char],
        start: usize,
        end: usize,
        sep_index: usize,
        out: &mut Vec<Piece>,
    ) {
        if end - start <= self.chunk_size {
            out.push((start, end));
            return;
        }
        for (level, separator) in SEPARATORS.iter().enumerate().skip(sep_index) {
            let sep_chars: Vec<char> = separator.chars().collect();
            let cuts = separator_cuts(chars, start, end, &sep_chars);
            if cuts.is_empty() {
                continue;
            }
            // The separator stays attached to the preceding piece, keeping
            // offsets exact.
            let mut piece_start = start;
            for cut in cuts {
                self.segment(chars, piece_start, cut, level + 1, out);
                piece_start = cut;
            }
            if piece_start < end {
                self.segment(chars, piece_start, end, level + 1, out);
            }
            return;
        }
        // Raw character cuts: single-character pieces let the merge phase
        // produce exact sliding windows.
        for position in start..end {
            out.push((position, position + 1));
        }
    }

    /// Greedily packs pieces into chunks of at most `chunk_size` characters,
    /// retaining a tail of at most `chunk_overlap` characters between
    /// neighbors.
    fn merge(&self, chars: &[char], pieces: &[Piece]) -> Vec<ChunkSpan> {
        let mut spans = Vec::new();
        let mut window: VecDeque<Piece> = VecDeque::new();
        let mut window_len = 0usize;

        for &piece in pieces {
            let piece_len = piece.1 - piece.0;
            if window_len + piece_len > self.chunk_size && !window.is_empty() {
                if let Some(span) = emit_span(chars, &window) {
                    spans.push(span);
                }
                while window_len > self.chunk_overlap
                    || (window_len + piece_len > self.chunk_size && window_len > 0)
                {
                    match window.pop_front() {
                        Some((dropped_start, dropped_end)) => {
                            window_len -= dropped_end - dropped_start;
                        }
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            window_len += piece_len;
        }

        if !window.is_empty() {
            if let Some(span) = emit_span(chars, &window) {
                spans.push(span);
            }
        }
        spans
    }
}

/// Character indexes just past each occurrence of `sep` in `[start, end)`.
/// A cut landing exactly on `end` is dropped so no piece comes out empty.
fn separator_cuts(chars: &[char], start: usize, end: usize, sep: &[char]) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut index = start;
    while index + sep.len() <= end {
        if chars[index..index + sep.len()] == *sep {
            cuts.push(index + sep.len());
            index += sep.len();
        } else {
            index += 1;
        }
    }
    if cuts.last() == Some(&end) {
        cuts.pop();
    }
    cuts
}

/// Materializes the current window as a span, trimming surrounding
/// whitespace while keeping `start` pointing at the first kept character.
fn emit_span(chars: &[char], window: &VecDeque<Piece>) -> Option<ChunkSpan> {
    let start = window.front()?.0;
    let end = window.back()?.1;

    let mut trimmed_start = start;
    let mut trimmed_end = end;
    while trimmed_start < trimmed_end && chars[trimmed_start].is_whitespace() {
        trimmed_start += 1;
    }
    while trimmed_end > trimmed_start && chars[trimmed_end - 1].is_whitespace() {
        trimmed_end -= 1;
    }
    if trimmed_start == trimmed_end {
        return None;
    }
    Some(ChunkSpan {
        start: trimmed_start,
        content: chars[trimmed_start..trimmed_end].iter().collect(),
    })
}
