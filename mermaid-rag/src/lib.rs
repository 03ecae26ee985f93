//! Retrieval core for the Mermaid documentation agent stack.
//!
//! ```text
//! Source URLs ──► ingestion::DocumentLoader ──► Document
//!                                 │
//! Document ──► ingestion::TextChunker ──► Chunk (+ start_index)
//!                                 │
//! Chunk ──► embeddings::EmbeddingProvider ──► dense vector
//!                                 │
//! (Chunk, vector) ──► store::HybridStore ──► dense + sparse index entries
//!                                 │
//! Query text ──► query::QueryService ──► weighted dense+sparse ranking
//! ```
//!
//! The ingestion side rebuilds the index wholesale (drop and recreate), the
//! query side serves weighted hybrid searches against whatever the last
//! completed rebuild committed.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod store;
pub mod types;

pub use config::Settings;
pub use error::RetrievalError;
pub use query::QueryService;
