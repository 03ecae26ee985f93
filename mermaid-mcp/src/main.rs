//! MCP tool server for the Mermaid agent: documentation search, diagram
//! validation, and diagram rendering over stdio.

mod mermaid_cli;
mod server;

use std::sync::Arc;

use mermaid_rag::embeddings::OllamaEmbeddingProvider;
use mermaid_rag::{QueryService, Settings};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::server::MermaidToolServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP protocol stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let embedder = Arc::new(OllamaEmbeddingProvider::new(
        &settings.embedding_endpoint,
        settings.embedding_model.clone(),
    )?);
    let query_service = QueryService::from_settings(&settings, embedder);

    info!("starting mermaid tool server on stdio");
    let service = MermaidToolServer::new(query_service).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
