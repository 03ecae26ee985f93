//! Embedding providers: a local model-serving backend and a deterministic
//! mock for tests and offline runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::RetrievalError;

/// Largest number of texts sent to the backend in one request.
const MAX_BATCH: usize = 64;

const EMBED_TIMEOUT: Duration = Duration::from_secs(120);

/// Maps text to fixed-dimension dense vectors.
///
/// Implementations must be deterministic for a fixed model: the same text
/// always embeds to the same vector. A backend failure is surfaced as
/// [`RetrievalError::ModelUnavailable`]; callers never substitute zero
/// vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the backing model, for logging.
    fn model_id(&self) -> &str;

    /// Embeds a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            RetrievalError::ModelUnavailable("backend returned no embedding".to_string())
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider backed by a local Ollama-compatible serving endpoint.
#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, RetrievalError> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            RetrievalError::Config(format!("invalid embedding endpoint {endpoint}: {err}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|err| {
                RetrievalError::Config(format!("failed to build embedding client: {err}"))
            })?;
        let model = model.into();
        debug!(model = %model, endpoint = %endpoint, "embedding provider ready");
        Ok(Self {
            client,
            endpoint,
            model,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = self.endpoint.join("api/embed").map_err(|err| {
            RetrievalError::Config(format!("invalid embedding endpoint path: {err}"))
        })?;
        let response = self
            .client
            .post(url)
            .json(&EmbedRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RetrievalError::Timeout {
                        operation: "embedding request".to_string(),
                        seconds: EMBED_TIMEOUT.as_secs(),
                    }
                } else {
                    RetrievalError::ModelUnavailable(err.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(RetrievalError::ModelUnavailable(format!(
                "embedding backend returned {}",
                response.status()
            )));
        }
        let payload: EmbedResponse = response.json().await.map_err(|err| {
            RetrievalError::ModelUnavailable(format!("malformed embedding response: {err}"))
        })?;
        if payload.embeddings.len() != input.len() {
            return Err(RetrievalError::ModelUnavailable(format!(
                "embedding backend returned {} vectors for {} inputs",
                payload.embeddings.len(),
                input.len()
            )));
        }
        Ok(payload.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            let mut embedded = self.request(batch).await?;
            vectors.append(&mut embedded);
        }
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if dimensions == 0 || vectors.iter().any(|vector| vector.len() != dimensions) {
            return Err(RetrievalError::ModelUnavailable(
                "embedding backend returned inconsistent dimensions".to_string(),
            ));
        }
        Ok(vectors)
    }
}

/// Deterministic hashed bag-of-words embedder.
///
/// Texts sharing vocabulary land near each other, which is enough signal for
/// integration tests without a live model.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimensions: 32 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_id(&self) -> &str {
        "mock-embedder"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts
            .iter()
            .map(|text| bag_of_words_vector(text, self.dimensions))
            .collect())
    }
}

fn bag_of_words_vector(text: &str, dimensions: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0.0f32; dimensions];
    for token in text.split_whitespace() {
        let token: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if token.is_empty() {
            continue;
        }
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let bucket = (hasher.finish() % dimensions as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}
