//! Hybrid persistent index: one dense vector field and one sparse lexical
//! field per chunk, queried with a weighted combination of both signals.

pub mod hybrid;

pub use hybrid::HybridStore;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Chunk;

/// Relative weighting of the two similarity signals in a hybrid query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            dense: 0.6,
            sparse: 0.4,
        }
    }
}

/// A chunk row as persisted in the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub source: String,
    pub title: String,
    pub chunk_index: usize,
    pub start_index: usize,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// An index entry ready for persistence: a chunk plus its dense vector. The
/// sparse representation is computed by the store over the whole corpus at
/// build time.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub chunk: IndexedChunk,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    /// Pairs a pipeline chunk with its embedding, assigning a fresh id.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        let metadata = serde_json::json!({
            "source": chunk.metadata.source,
            "title": chunk.metadata.title,
            "start_index": chunk.start_index,
        });
        Self {
            chunk: IndexedChunk {
                id: Uuid::new_v4().to_string(),
                source: chunk.metadata.source.clone(),
                title: chunk.metadata.title.clone(),
                chunk_index: chunk.chunk_index,
                start_index: chunk.start_index,
                content: chunk.content.clone(),
                metadata,
            },
            embedding,
        }
    }
}
