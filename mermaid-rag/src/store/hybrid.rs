//! SQLite-backed hybrid store: sqlite-vec holds the dense field, FTS5 holds
//! the sparse (BM25) field, and queries fuse both with a weighted sum.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::mem::transmute;
use std::os::raw::c_char;
use std::sync::OnceLock;

use regex::Regex;
use tokio_rusqlite::{Connection, ffi};
use tracing::debug;

use super::{IndexEntry, IndexedChunk, SearchWeights};
use crate::error::RetrievalError;

/// Over-sampling factor applied to each leg before fusion, so a hit ranked
/// well by only one signal still reaches the merge.
const CANDIDATE_FACTOR: usize = 4;
const MIN_CANDIDATES: usize = 16;

/// Persistent hybrid index over one shared storage connection.
///
/// The connection is serialized: a rebuild and any concurrent queries through
/// the same handle are ordered, so reads always observe the most recently
/// committed build.
#[derive(Clone)]
pub struct HybridStore {
    conn: Connection,
}

impl HybridStore {
    /// Opens the store at `uri`, registering the sqlite-vec extension once
    /// per process and verifying it is loaded.
    pub async fn connect(uri: &str) -> Result<Self, RetrievalError> {
        register_sqlite_vec()?;
        let conn = Connection::open(uri.to_string())
            .await
            .map_err(|err| storage_error(err.into()))?;
        conn.call(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
            // Writers from other processes should make readers wait briefly
            // instead of failing with SQLITE_BUSY.
            conn.execute_batch("PRAGMA busy_timeout = 5000")?;
            Ok(())
        })
        .await
        .map_err(storage_error)?;
        Ok(Self { conn })
    }

    /// Persists every entry, recomputing the sparse corpus, inside a single
    /// transaction. With `drop_existing` the previous index is discarded
    /// first: a full replace, never an incremental upsert. On error the
    /// transaction rolls back and the prior index stays intact.
    pub async fn rebuild(
        &self,
        entries: Vec<IndexEntry>,
        drop_existing: bool,
    ) -> Result<usize, RetrievalError> {
        let dimensions = entries.first().map(|entry| entry.embedding.len()).unwrap_or(0);
        if dimensions == 0 {
            return Err(RetrievalError::Storage(
                "cannot build an index from zero entries".to_string(),
            ));
        }
        if entries.iter().any(|entry| entry.embedding.len() != dimensions) {
            return Err(RetrievalError::Storage(
                "embedding dimension mismatch across entries".to_string(),
            ));
        }

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let embedding_json = serde_json::to_string(&entry.embedding)
                .map_err(|err| RetrievalError::Storage(err.to_string()))?;
            rows.push((entry.chunk, embedding_json));
        }

        let count = rows.len();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if drop_existing {
                    tx.execute_batch(
                        "DROP TABLE IF EXISTS chunks_sparse;
                         DROP TABLE IF EXISTS chunks_dense;
                         DROP TABLE IF EXISTS chunks;",
                    )?;
                }
                tx.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS chunks (
                         id TEXT PRIMARY KEY,
                         source TEXT NOT NULL,
                         title TEXT NOT NULL DEFAULT '',
                         chunk_index INTEGER NOT NULL,
                         start_index INTEGER NOT NULL,
                         content TEXT NOT NULL,
                         metadata TEXT NOT NULL DEFAULT '{{}}'
                     );
                     CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);
                     CREATE VIRTUAL TABLE IF NOT EXISTS chunks_dense
                         USING vec0(embedding float[{dimensions}]);
                     CREATE VIRTUAL TABLE IF NOT EXISTS chunks_sparse
                         USING fts5(content, content='chunks', content_rowid='rowid');"
                ))?;
                {
                    let mut insert_chunk = tx.prepare(
                        "INSERT INTO chunks
                             (id, source, title, chunk_index, start_index, content, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )?;
                    let mut insert_dense = tx.prepare(
                        "INSERT INTO chunks_dense (rowid, embedding) VALUES (?1, vec_f32(?2))",
                    )?;
                    for (chunk, embedding_json) in &rows {
                        insert_chunk.execute((
                            chunk.id.as_str(),
                            chunk.source.as_str(),
                            chunk.title.as_str(),
                            chunk.chunk_index as i64,
                            chunk.start_index as i64,
                            chunk.content.as_str(),
                            chunk.metadata.to_string(),
                        ))?;
                        let rowid = tx.last_insert_rowid();
                        insert_dense.execute((rowid, embedding_json.as_str()))?;
                    }
                }
                // Repopulate the external-content FTS table from `chunks`.
                tx.execute(
                    "INSERT INTO chunks_sparse (chunks_sparse) VALUES ('rebuild')",
                    [],
                )?;
                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(storage_error)
    }

    /// Scores every index entry by the weighted sum of dense and sparse
    /// similarity and returns the top `k` by descending combined score.
    ///
    /// `embedding` is the query's dense vector, `text` its raw form for the
    /// lexical leg. An index that has never been built returns an empty list
    /// rather than failing.
    pub async fn query(
        &self,
        embedding: &[f32],
        text: &str,
        k: usize,
        weights: SearchWeights,
    ) -> Result<Vec<(IndexedChunk, f32)>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if !self.is_initialized().await? {
            debug!("hybrid index not initialized; returning no results");
            return Ok(Vec::new());
        }

        let fetch = (k * CANDIDATE_FACTOR).max(MIN_CANDIDATES) as i64;
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| RetrievalError::Storage(err.to_string()))?;
        let match_expression = fts_match_expression(text);

        let (dense, sparse) = self
            .conn
            .call(move |conn| {
                let mut dense: Vec<(i64, IndexedChunk, f32)> = Vec::new();
                {
                    let mut stmt = conn.prepare(
                        "SELECT c.rowid, c.id, c.source, c.title, c.chunk_index,
                                c.start_index, c.content, c.metadata,
                                vec_distance_cosine(d.embedding, vec_f32(?1)) AS distance
                         FROM chunks c
                         JOIN chunks_dense d ON d.rowid = c.rowid
                         ORDER BY distance ASC
                         LIMIT ?2",
                    )?;
                    let mapped = stmt.query_map((embedding_json.as_str(), fetch), |row| {
                        let rowid: i64 = row.get(0)?;
                        let chunk = IndexedChunk {
                            id: row.get(1)?,
                            source: row.get(2)?,
                            title: row.get(3)?,
                            chunk_index: row.get::<_, i64>(4)? as usize,
                            start_index: row.get::<_, i64>(5)? as usize,
                            content: row.get(6)?,
                            metadata: serde_json::from_str(&row.get::<_, String>(7)?)
                                .unwrap_or_default(),
                        };
                        let distance: f64 = row.get(8)?;
                        // Cosine distance to similarity.
                        Ok((rowid, chunk, 1.0 - distance as f32))
                    })?;
                    for row in mapped {
                        dense.push(row?);
                    }
                }

                let mut sparse: Vec<(i64, IndexedChunk, f32)> = Vec::new();
                if let Some(match_expression) = match_expression {
                    let mut stmt = conn.prepare(
                        "SELECT c.rowid, c.id, c.source, c.title, c.chunk_index,
                                c.start_index, c.content, c.metadata,
                                bm25(chunks_sparse) AS rank
                         FROM chunks_sparse
                         JOIN chunks c ON c.rowid = chunks_sparse.rowid
                         WHERE chunks_sparse MATCH ?1
                         ORDER BY rank ASC
                         LIMIT ?2",
                    )?;
                    let mapped = stmt.query_map((match_expression.as_str(), fetch), |row| {
                        let rowid: i64 = row.get(0)?;
                        let chunk = IndexedChunk {
                            id: row.get(1)?,
                            source: row.get(2)?,
                            title: row.get(3)?,
                            chunk_index: row.get::<_, i64>(4)? as usize,
                            start_index: row.get::<_, i64>(5)? as usize,
                            content: row.get(6)?,
                            metadata: serde_json::from_str(&row.get::<_, String>(7)?)
                                .unwrap_or_default(),
                        };
                        let rank: f64 = row.get(8)?;
                        // FTS5 bm25() ranks ascending: more negative is more
                        // relevant. Flip the sign so higher means better.
                        Ok((rowid, chunk, -rank as f32))
                    })?;
                    for row in mapped {
                        sparse.push(row?);
                    }
                }

                Ok((dense, sparse))
            })
            .await
            .map_err(storage_error)?;

        Ok(fuse(dense, sparse, k, weights))
    }

    /// Number of chunks currently indexed; zero when no build has run.
    pub async fn count(&self) -> Result<usize, RetrievalError> {
        if !self.is_initialized().await? {
            return Ok(0);
        }
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(storage_error)
    }

    async fn is_initialized(&self) -> Result<bool, RetrievalError> {
        self.conn
            .call(|conn| {
                let tables: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master
                     WHERE type = 'table'
                       AND name IN ('chunks', 'chunks_dense', 'chunks_sparse')",
                    [],
                    |row| row.get(0),
                )?;
                Ok(tables == 3)
            })
            .await
            .map_err(storage_error)
    }
}

/// Merges the two candidate lists by rowid and ranks by the weighted sum of
/// per-leg min-max normalized scores. Sorting is stable, so ties keep
/// insertion order.
fn fuse(
    dense: Vec<(i64, IndexedChunk, f32)>,
    sparse: Vec<(i64, IndexedChunk, f32)>,
    k: usize,
    weights: SearchWeights,
) -> Vec<(IndexedChunk, f32)> {
    let dense_scores = min_max_normalize(dense.iter().map(|(_, _, s)| *s).collect());
    let sparse_scores = min_max_normalize(sparse.iter().map(|(_, _, s)| *s).collect());

    let mut order: Vec<i64> = Vec::new();
    let mut merged: HashMap<i64, (IndexedChunk, f32)> = HashMap::new();

    for (position, (rowid, chunk, _)) in dense.into_iter().enumerate() {
        merged.insert(rowid, (chunk, weights.dense * dense_scores[position]));
        order.push(rowid);
    }
    for (position, (rowid, chunk, _)) in sparse.into_iter().enumerate() {
        match merged.entry(rowid) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().1 += weights.sparse * sparse_scores[position];
            }
            Entry::Vacant(vacant) => {
                vacant.insert((chunk, weights.sparse * sparse_scores[position]));
                order.push(rowid);
            }
        }
    }

    let mut results: Vec<(IndexedChunk, f32)> = order
        .into_iter()
        .filter_map(|rowid| merged.remove(&rowid))
        .collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    results.truncate(k);
    results
}

/// Scales scores into `[0, 1]` over the candidate set. A degenerate set
/// (every score equal) maps to 1.0 so the leg still contributes its weight.
fn min_max_normalize(scores: Vec<f32>) -> Vec<f32> {
    let Some(&first) = scores.first() else {
        return Vec::new();
    };
    let (min, max) = scores.iter().fold((first, first), |(min, max), &score| {
        (min.min(score), max.max(score))
    });
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.into_iter().map(|score| (score - min) / range).collect()
}

/// Builds an OR-of-terms FTS5 match expression from free text, quoting each
/// term so query punctuation cannot break the FTS syntax.
fn fts_match_expression(text: &str) -> Option<String> {
    static TERMS: OnceLock<Regex> = OnceLock::new();
    let terms = TERMS.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+").expect("valid literal pattern"));

    let quoted: Vec<String> = terms
        .find_iter(text)
        .map(|term| format!("\"{}\"", term.as_str()))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

fn storage_error(err: tokio_rusqlite::Error) -> RetrievalError {
    RetrievalError::Storage(err.to_string())
}

/// Registers sqlite-vec as an auto extension so every new connection can use
/// `vec0` tables and the `vec_*` functions. Safe to call repeatedly.
fn register_sqlite_vec() -> Result<(), RetrievalError> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

    REGISTERED
        .get_or_init(|| unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != ffi::SQLITE_OK {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        })
        .clone()
        .map_err(RetrievalError::Storage)
}
