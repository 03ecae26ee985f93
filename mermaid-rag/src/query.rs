//! Weighted hybrid search over the persisted index.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::Settings;
use crate::embeddings::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::store::{HybridStore, IndexedChunk, SearchWeights};

/// Default number of results returned to tool callers.
pub const DEFAULT_TOP_K: usize = 3;

/// Search front end held by long-lived callers (the tool server).
///
/// The storage connection is created once: either eagerly through
/// [`QueryService::connect`] or lazily on the first search. The init guard
/// serializes concurrent first calls, and repeated calls after the first
/// success are no-ops.
pub struct QueryService {
    storage_uri: String,
    embedder: Arc<dyn EmbeddingProvider>,
    weights: SearchWeights,
    default_k: usize,
    store: OnceCell<HybridStore>,
}

impl QueryService {
    pub fn new(storage_uri: impl Into<String>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            storage_uri: storage_uri.into(),
            embedder,
            weights: SearchWeights::default(),
            default_k: DEFAULT_TOP_K,
            store: OnceCell::new(),
        }
    }

    /// Builds a service honoring configured weights and default `k`.
    pub fn from_settings(settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            storage_uri: settings.storage_uri.clone(),
            embedder,
            weights: SearchWeights {
                dense: settings.dense_weight,
                sparse: settings.sparse_weight,
            },
            default_k: settings.search_top_k,
            store: OnceCell::new(),
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Opens the storage connection. Idempotent.
    pub async fn connect(&self) -> Result<(), RetrievalError> {
        self.store().await.map(|_| ())
    }

    /// Embeds `query` and returns up to `k` ranked results, connecting
    /// lazily on first use. An index that has never been built yields an
    /// empty list.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<(IndexedChunk, f32)>, RetrievalError> {
        let k = k.unwrap_or(self.default_k);
        let store = self.store().await?;
        let embedding = self.embedder.embed(query).await?;
        let results = store.query(&embedding, query, k, self.weights).await?;
        debug!(query, results = results.len(), "hybrid search complete");
        Ok(results)
    }

    async fn store(&self) -> Result<&HybridStore, RetrievalError> {
        self.store
            .get_or_try_init(|| HybridStore::connect(&self.storage_uri))
            .await
    }
}
