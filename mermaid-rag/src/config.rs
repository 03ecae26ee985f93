//! Environment-driven settings shared by the ingestion job and tool server.

use std::env;

use crate::error::RetrievalError;

pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_DENSE_WEIGHT: f32 = 0.6;
pub const DEFAULT_SPARSE_WEIGHT: f32 = 0.4;
pub const DEFAULT_SEARCH_TOP_K: usize = 3;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Runtime configuration resolved once at process start.
///
/// `EMBEDDING_MODEL` and `MILVUS_URI` are required; everything else falls
/// back to documented defaults. `MILVUS_URI` names the storage location of
/// the hybrid index (a SQLite database path).
#[derive(Clone, Debug)]
pub struct Settings {
    pub embedding_model: String,
    pub storage_uri: String,
    pub embedding_endpoint: String,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub search_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Settings {
    /// Loads settings from a `.env` file (if present) and the process
    /// environment. Any missing required variable is a startup failure.
    pub fn from_env() -> Result<Self, RetrievalError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RetrievalError> {
        let settings = Self {
            embedding_model: require(&lookup, "EMBEDDING_MODEL")?,
            storage_uri: require(&lookup, "MILVUS_URI")?,
            embedding_endpoint: lookup("OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_ENDPOINT.to_string()),
            dense_weight: parse_or(&lookup, "SEARCH_DENSE_WEIGHT", DEFAULT_DENSE_WEIGHT)?,
            sparse_weight: parse_or(&lookup, "SEARCH_SPARSE_WEIGHT", DEFAULT_SPARSE_WEIGHT)?,
            search_top_k: parse_or(&lookup, "SEARCH_TOP_K", DEFAULT_SEARCH_TOP_K)?,
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: parse_or(&lookup, "CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), RetrievalError> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RetrievalError::Config(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.dense_weight < 0.0 || self.sparse_weight < 0.0 {
            return Err(RetrievalError::Config(
                "search weights must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn require(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<String, RetrievalError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RetrievalError::Config(format!(
            "missing required environment variable {key}"
        ))),
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, RetrievalError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|err| {
            RetrievalError::Config(format!("invalid value for {key}: {err}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("EMBEDDING_MODEL", "nomic-embed-text"),
            ("MILVUS_URI", "./mermaid_docs.sqlite"),
        ]))
        .unwrap();

        assert_eq!(settings.embedding_model, "nomic-embed-text");
        assert_eq!(settings.storage_uri, "./mermaid_docs.sqlite");
        assert_eq!(settings.embedding_endpoint, DEFAULT_EMBEDDING_ENDPOINT);
        assert_eq!(settings.dense_weight, DEFAULT_DENSE_WEIGHT);
        assert_eq!(settings.sparse_weight, DEFAULT_SPARSE_WEIGHT);
        assert_eq!(settings.search_top_k, DEFAULT_SEARCH_TOP_K);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
    }

    #[test]
    fn missing_required_var_fails() {
        let err = Settings::from_lookup(lookup_from(&[("EMBEDDING_MODEL", "m")])).unwrap_err();
        assert!(err.to_string().contains("MILVUS_URI"));
    }

    #[test]
    fn overrides_are_honored() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("EMBEDDING_MODEL", "m"),
            ("MILVUS_URI", "db.sqlite"),
            ("OLLAMA_HOST", "http://embedder:11434"),
            ("SEARCH_DENSE_WEIGHT", "0.7"),
            ("SEARCH_SPARSE_WEIGHT", "0.3"),
            ("SEARCH_TOP_K", "5"),
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", "50"),
        ]))
        .unwrap();

        assert_eq!(settings.embedding_endpoint, "http://embedder:11434");
        assert_eq!(settings.dense_weight, 0.7);
        assert_eq!(settings.sparse_weight, 0.3);
        assert_eq!(settings.search_top_k, 5);
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.chunk_overlap, 50);
    }

    #[test]
    fn unparseable_override_fails() {
        let err = Settings::from_lookup(lookup_from(&[
            ("EMBEDDING_MODEL", "m"),
            ("MILVUS_URI", "db.sqlite"),
            ("SEARCH_TOP_K", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SEARCH_TOP_K"));
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let err = Settings::from_lookup(lookup_from(&[
            ("EMBEDDING_MODEL", "m"),
            ("MILVUS_URI", "db.sqlite"),
            ("CHUNK_SIZE", "100"),
            ("CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }
}
