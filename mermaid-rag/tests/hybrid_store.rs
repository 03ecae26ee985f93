//! Integration tests for the hybrid store and query service, using the
//! deterministic mock embedder and throwaway SQLite files.

use std::sync::Arc;

use tempfile::TempDir;

use mermaid_rag::QueryService;
use mermaid_rag::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use mermaid_rag::ingestion::TextChunker;
use mermaid_rag::store::{HybridStore, IndexEntry, SearchWeights};
use mermaid_rag::types::{Document, DocumentMetadata};

fn scratch_db() -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir
        .path()
        .join("index.sqlite")
        .to_string_lossy()
        .into_owned();
    (dir, path)
}

fn document(source: &str, content: &str) -> Document {
    Document::new(
        content,
        DocumentMetadata {
            source: source.to_string(),
            title: String::new(),
        },
    )
}

async fn entries_for(
    embedder: &MockEmbeddingProvider,
    documents: &[Document],
) -> Vec<IndexEntry> {
    let chunker = TextChunker::new(1000, 200).expect("chunker");
    let chunks = chunker.split_documents(documents);
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await.expect("embeddings");
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| IndexEntry::from_chunk(chunk, embedding))
        .collect()
}

#[tokio::test]
async fn query_before_any_build_returns_empty() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let embedding = embedder.embed("flowchart").await.expect("embed");
    let results = store
        .query(&embedding, "flowchart", 5, SearchWeights::default())
        .await
        .expect("query");

    assert!(results.is_empty());
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn single_document_roundtrip() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let documents = vec![document(
        "https://example.com/flowchart",
        "Flowcharts use `-->` to connect nodes.",
    )];
    let entries = entries_for(&embedder, &documents).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].chunk.start_index, 0);

    let indexed = store.rebuild(entries, true).await.expect("rebuild");
    assert_eq!(indexed, 1);
    assert_eq!(store.count().await.expect("count"), 1);

    let embedding = embedder.embed("flowchart arrow syntax").await.expect("embed");
    let results = store
        .query(&embedding, "flowchart arrow syntax", 1, SearchWeights::default())
        .await
        .expect("query");

    assert_eq!(results.len(), 1);
    assert!(results[0].0.content.to_lowercase().contains("flowchart"));
}

#[tokio::test]
async fn rebuild_is_idempotent_for_identical_input() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let documents = vec![
        document(
            "https://example.com/flowchart",
            "Flowcharts connect nodes with arrows and labeled edges.",
        ),
        document(
            "https://example.com/sequence",
            "Sequence diagrams show participants exchanging messages over time.",
        ),
        document(
            "https://example.com/gantt",
            "Gantt charts lay out project tasks along a timeline.",
        ),
    ];

    let query = "sequence diagram messages";
    let embedding = embedder.embed(query).await.expect("embed");

    store
        .rebuild(entries_for(&embedder, &documents).await, true)
        .await
        .expect("first rebuild");
    let first = store
        .query(&embedding, query, 3, SearchWeights::default())
        .await
        .expect("first query");

    store
        .rebuild(entries_for(&embedder, &documents).await, true)
        .await
        .expect("second rebuild");
    let second = store
        .query(&embedding, query, 3, SearchWeights::default())
        .await
        .expect("second query");

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.0.content, b.0.content);
        assert!((a.1 - b.1).abs() < 1e-6);
    }
}

#[tokio::test]
async fn query_returns_at_most_k_sorted_descending() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let documents: Vec<Document> = (0..10)
        .map(|index| {
            document(
                &format!("https://example.com/page{index}"),
                &format!("Diagram page {index} covers flowchart nodes edges and layout topic{index}."),
            )
        })
        .collect();
    store
        .rebuild(entries_for(&embedder, &documents).await, true)
        .await
        .expect("rebuild");

    let embedding = embedder.embed("flowchart layout").await.expect("embed");
    let results = store
        .query(&embedding, "flowchart layout", 3, SearchWeights::default())
        .await
        .expect("query");

    assert!(results.len() <= 3);
    assert!(!results.is_empty());
    for pair in results.windows(2) {
        assert!(pair[0].1 >= pair[1].1, "scores must be non-increasing");
    }
}

#[tokio::test]
async fn rebuild_fully_replaces_the_previous_corpus() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let old_corpus = vec![document(
        "https://example.com/old",
        "Old corpus text about pie charts and slices.",
    )];
    store
        .rebuild(entries_for(&embedder, &old_corpus).await, true)
        .await
        .expect("first rebuild");

    let new_corpus = vec![
        document(
            "https://example.com/new-a",
            "Fresh corpus text about state diagrams and transitions.",
        ),
        document(
            "https://example.com/new-b",
            "Fresh corpus text about class diagrams and relations.",
        ),
    ];
    store
        .rebuild(entries_for(&embedder, &new_corpus).await, true)
        .await
        .expect("second rebuild");

    // Even a query aimed at the old corpus must only surface new entries.
    let embedding = embedder.embed("pie charts slices").await.expect("embed");
    let results = store
        .query(&embedding, "pie charts slices", 10, SearchWeights::default())
        .await
        .expect("query");

    assert!(!results.is_empty());
    for (chunk, _) in &results {
        assert!(chunk.source.starts_with("https://example.com/new-"));
    }
    assert_eq!(store.count().await.expect("count"), 2);
}

#[tokio::test]
async fn sparse_leg_surfaces_exact_terms() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let documents = vec![
        document(
            "https://example.com/flowchart",
            "Flowchart arrows use the --> connector between nodes.",
        ),
        document(
            "https://example.com/timeline",
            "Timelines order events chronologically for storytelling.",
        ),
    ];
    store
        .rebuild(entries_for(&embedder, &documents).await, true)
        .await
        .expect("rebuild");

    let query = "flowchart connector";
    let embedding = embedder.embed(query).await.expect("embed");
    let results = store
        .query(&embedding, query, 1, SearchWeights::default())
        .await
        .expect("query");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.source, "https://example.com/flowchart");
}

#[tokio::test]
async fn rebuild_rejects_empty_and_mismatched_input() {
    let (_dir, db) = scratch_db();
    let embedder = MockEmbeddingProvider::new();
    let store = HybridStore::connect(&db).await.expect("connect");

    let err = store.rebuild(Vec::new(), true).await.unwrap_err();
    assert!(matches!(err, mermaid_rag::RetrievalError::Storage(_)));

    let documents = vec![document("https://example.com/a", "Some indexable text.")];
    let mut entries = entries_for(&embedder, &documents).await;
    entries[0].embedding = vec![0.0; 3];
    let mut mismatched = entries.clone();
    mismatched.push(IndexEntry {
        chunk: entries[0].chunk.clone(),
        embedding: vec![0.0; 5],
    });
    let err = store.rebuild(mismatched, true).await.unwrap_err();
    assert!(matches!(err, mermaid_rag::RetrievalError::Storage(_)));
}

#[tokio::test]
async fn query_service_connects_lazily_and_idempotently() {
    let (_dir, db) = scratch_db();
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let store = HybridStore::connect(&db).await.expect("connect");

    let documents = vec![document(
        "https://example.com/flowchart",
        "Flowcharts use `-->` to connect nodes.",
    )];
    store
        .rebuild(entries_for(&embedder, &documents).await, true)
        .await
        .expect("rebuild");

    let service = QueryService::new(db.as_str(), embedder.clone());

    // First search opens the connection lazily.
    let results = service.search("flowchart arrow syntax", Some(1)).await.expect("search");
    assert_eq!(results.len(), 1);

    // Explicit connects afterwards are no-ops.
    service.connect().await.expect("first connect");
    service.connect().await.expect("second connect");

    let again = service.search("flowchart arrow syntax", None).await.expect("search again");
    assert!(!again.is_empty());
    assert!(again.len() <= service.default_k());
}
