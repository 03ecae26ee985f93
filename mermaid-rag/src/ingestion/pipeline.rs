//! Composes loader → chunker → embedder → hybrid index rebuild.

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::embeddings::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::ingestion::{DocumentLoader, TextChunker};
use crate::store::{HybridStore, IndexEntry};

/// Full-rebuild ingestion over an explicit set of collaborators.
///
/// Construction takes every dependency up front; nothing is resolved from
/// process-global state.
pub struct IngestionPipeline {
    loader: DocumentLoader,
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: HybridStore,
}

impl IngestionPipeline {
    pub fn new(
        loader: DocumentLoader,
        chunker: TextChunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: HybridStore,
    ) -> Self {
        Self {
            loader,
            chunker,
            embedder,
            store,
        }
    }

    /// Rebuilds the index from `sources`, replacing any previous contents.
    ///
    /// Returns the number of chunks indexed. A failure in any stage aborts
    /// the run before the rebuild transaction commits, so the previously
    /// committed index stays queryable.
    pub async fn ingest(&self, sources: &[Url]) -> Result<usize, RetrievalError> {
        info!(sources = sources.len(), "starting ingestion");
        let documents = self.loader.load(sources).await?;
        info!(documents = documents.len(), "documents loaded");

        let chunks = self.chunker.split_documents(&documents);
        if chunks.is_empty() {
            return Err(RetrievalError::InvalidDocument(
                "source documents produced no chunks".to_string(),
            ));
        }
        info!(chunks = chunks.len(), "documents chunked");

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RetrievalError::ModelUnavailable(format!(
                "expected {} embeddings, received {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        info!(
            model = self.embedder.model_id(),
            vectors = embeddings.len(),
            "chunks embedded"
        );

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry::from_chunk(chunk, embedding))
            .collect();
        let indexed = self.store.rebuild(entries, true).await?;
        info!(indexed, "index rebuilt");
        Ok(indexed)
    }
}
