//! Batch ingestion job: scrapes the Mermaid documentation set and rebuilds
//! the hybrid search index, replacing any previous contents.
//!
//! Takes no arguments. Exits 0 on success; on failure prints the error and
//! exits non-zero, leaving any previously committed index untouched.

use std::sync::Arc;

use mermaid_rag::embeddings::OllamaEmbeddingProvider;
use mermaid_rag::ingestion::{DocumentLoader, IngestionPipeline, TextChunker};
use mermaid_rag::store::HybridStore;
use mermaid_rag::{QueryService, RetrievalError, Settings};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Documentation pages indexed by every run.
const SOURCE_URLS: &[&str] = &[
    "https://mermaid.ai/open-source/syntax/flowchart.html",
    "https://mermaid.ai/open-source/syntax/sequenceDiagram.html",
    "https://mermaid.ai/open-source/syntax/classDiagram.html",
    "https://mermaid.ai/open-source/syntax/stateDiagram.html",
    "https://mermaid.ai/open-source/syntax/entityRelationshipDiagram.html",
    "https://mermaid.ai/open-source/syntax/userJourney.html",
    "https://mermaid.ai/open-source/syntax/gantt.html",
    "https://mermaid.ai/open-source/syntax/pie.html",
    "https://mermaid.ai/open-source/syntax/quadrantChart.html",
    "https://mermaid.ai/open-source/syntax/requirementDiagram.html",
    "https://mermaid.ai/open-source/syntax/gitgraph.html",
    "https://mermaid.ai/open-source/syntax/c4.html",
    "https://mermaid.ai/open-source/syntax/mindmap.html",
    "https://mermaid.ai/open-source/syntax/timeline.html",
    "https://mermaid.ai/open-source/syntax/zenuml.html",
    "https://mermaid.ai/open-source/syntax/sankey.html",
    "https://mermaid.ai/open-source/syntax/xyChart.html",
    "https://mermaid.ai/open-source/syntax/block.html",
    "https://mermaid.ai/open-source/syntax/packet.html",
    "https://mermaid.ai/open-source/syntax/kanban.html",
    "https://mermaid.ai/open-source/syntax/architecture.html",
    "https://mermaid.ai/open-source/syntax/radar.html",
    "https://mermaid.ai/open-source/syntax/treemap.html",
    "https://mermaid.ai/open-source/syntax/examples.html",
    "https://mermaid.ai/open-source/config/schema-docs/config.html",
    "https://mermaid.ai/open-source/config/directives.html",
    "https://mermaid.ai/open-source/config/theming.html",
    "https://mermaid.ai/open-source/config/math.html",
    "https://mermaid.ai/open-source/config/layouts.html",
];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("ingestion failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RetrievalError> {
    info!("starting documentation ingestion");
    let settings = Settings::from_env()?;
    let sources = parse_sources()?;

    let embedder = Arc::new(OllamaEmbeddingProvider::new(
        &settings.embedding_endpoint,
        settings.embedding_model.clone(),
    )?);
    let pipeline = IngestionPipeline::new(
        DocumentLoader::new()?,
        TextChunker::new(settings.chunk_size, settings.chunk_overlap)?,
        embedder.clone(),
        HybridStore::connect(&settings.storage_uri).await?,
    );

    let indexed = pipeline.ingest(&sources).await?;
    info!(indexed, "ingestion finished");

    verify_index(&settings, embedder).await
}

fn parse_sources() -> Result<Vec<Url>, RetrievalError> {
    SOURCE_URLS
        .iter()
        .map(|raw| {
            Url::parse(raw)
                .map_err(|err| RetrievalError::Config(format!("invalid source url {raw}: {err}")))
        })
        .collect()
}

/// Issues a sample query against the fresh index and logs the ranked hits,
/// so a broken build is visible right after the run.
async fn verify_index(
    settings: &Settings,
    embedder: Arc<OllamaEmbeddingProvider>,
) -> Result<(), RetrievalError> {
    let service = QueryService::from_settings(settings, embedder);
    let results = service.search("flowchart mermaid", Some(5)).await?;
    info!(results = results.len(), "verification query complete");
    for (chunk, score) in &results {
        debug!(
            title = %chunk.title,
            score,
            preview = %chunk.content.chars().take(100).collect::<String>(),
            "verification hit"
        );
    }
    Ok(())
}
