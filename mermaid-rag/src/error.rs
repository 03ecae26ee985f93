//! Error taxonomy shared across the retrieval crate.

use thiserror::Error;

/// Failures surfaced by the retrieval pipeline and query path.
///
/// Ingestion-stage errors abort the whole batch; the query path logs them and
/// reports a sanitized failure to the caller instead of crashing a long-lived
/// server.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A source location could not be fetched.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// The embedding backend is unreachable or returned a malformed response.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The index store could not be reached or failed mid-operation.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// An operation exceeded its configured bound.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A fetched document could not be turned into indexable content.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Required configuration is missing or unparseable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
