//! Transient data types flowing through the ingestion pipeline.

use serde::{Deserialize, Serialize};

/// Provenance carried from a fetched page to every chunk cut from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Source URL the document was fetched from.
    pub source: String,
    /// Page title, empty when the page does not declare one.
    pub title: String,
}

/// Raw document produced by the loader. Immutable once created.
#[derive(Clone, Debug)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Bounded-length text segment cut from a [`Document`].
///
/// `content` is an exact substring of the source document; `start_index` is
/// its character offset there.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Character offset of `content` within the source document.
    pub start_index: usize,
    /// Zero-based position of this chunk among its document's chunks.
    pub chunk_index: usize,
}
