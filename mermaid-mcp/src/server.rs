//! Tool handlers exposed to the agent runtime.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData, Implementation, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use mermaid_rag::QueryService;

use crate::mermaid_cli::{
    DEFAULT_RENDER_TIMEOUT_SECS, MermaidCli, RenderBackground, RenderFormat, RenderOptions,
    RenderTheme,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchDocsParams {
    /// Free-text query against the Mermaid documentation index.
    query: String,
}

/// One search hit, reduced to the shape agents consume.
#[derive(Debug, Serialize)]
struct DocResult {
    content: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ValidateParams {
    /// Mermaid diagram source to validate.
    mermaid_code: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RenderParams {
    /// Mermaid diagram source to render.
    mermaid_code: String,
    /// Output format: svg, png, or pdf. Defaults to svg.
    #[serde(default)]
    format: Option<RenderFormat>,
    /// Rendering theme: default, dark, neutral, or forest.
    #[serde(default)]
    theme: Option<RenderTheme>,
    /// Canvas background: transparent or white.
    #[serde(default)]
    background: Option<RenderBackground>,
    /// Upper bound for the render subprocess, in seconds. Defaults to 8.
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// MCP server wiring the retrieval core and the Mermaid CLI into tools.
#[derive(Clone)]
pub struct MermaidToolServer {
    query_service: Arc<QueryService>,
    cli: MermaidCli,
    tool_router: ToolRouter<Self>,
}

impl MermaidToolServer {
    pub fn new(query_service: QueryService) -> Self {
        Self {
            query_service: Arc::new(query_service),
            cli: MermaidCli::default(),
            tool_router: Self::tool_router(),
        }
    }
}

fn internal_error(message: impl Into<String>) -> ErrorData {
    ErrorData {
        code: ErrorCode::INTERNAL_ERROR,
        message: Cow::from(message.into()),
        data: None,
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| internal_error(format!("failed to serialize tool result: {err}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[tool_router]
impl MermaidToolServer {
    #[tool(
        description = "Search official Mermaid documentation and curated references. Returns authoritative syntax rules, examples, errors, and limitations. Use this tool before generating or validating Mermaid diagrams."
    )]
    async fn search_mermaid_docs(
        &self,
        Parameters(params): Parameters<SearchDocsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(query = %params.query, "searching mermaid docs");
        let results = self
            .query_service
            .search(&params.query, None)
            .await
            .map_err(|err| {
                // Log the detail, hand the agent a sanitized signal.
                error!(stage = "query", query = %params.query, %err, "documentation search failed");
                internal_error("documentation search is currently unavailable")
            })?;

        for (chunk, score) in &results {
            debug!(
                title = %chunk.title,
                score,
                preview = %truncate(&chunk.content, 100),
                "search hit"
            );
        }

        let payload: Vec<DocResult> = results
            .into_iter()
            .map(|(chunk, _)| DocResult {
                content: chunk.content,
            })
            .collect();
        json_result(&payload)
    }

    #[tool(
        description = "Validate Mermaid diagram syntax using the official Mermaid CLI. Returns whether the diagram is valid and provides CLI error messages if invalid."
    )]
    async fn validate_mermaid_diagram(
        &self,
        Parameters(params): Parameters<ValidateParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let report = self.cli.validate(&params.mermaid_code).await;
        debug!(valid = report.valid, "diagram validated");
        json_result(&report)
    }

    #[tool(
        description = "Render a Mermaid diagram into an image (SVG, PNG, or PDF) using the Mermaid CLI. Returns a base64-encoded image suitable for embedding in Markdown."
    )]
    async fn render_mermaid_diagram(
        &self,
        Parameters(params): Parameters<RenderParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let options = RenderOptions {
            format: params.format.unwrap_or_default(),
            theme: params.theme.unwrap_or_default(),
            background: params.background.unwrap_or_default(),
            timeout: Duration::from_secs(
                params.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
            ),
        };
        let report = self.cli.render(&params.mermaid_code, &options).await;
        debug!(success = report.success, "diagram render attempted");
        json_result(&report)
    }
}

#[tool_handler]
impl ServerHandler for MermaidToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mermaid-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Mermaid Tool Server".to_string()),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Tools for grounding, validating, and rendering Mermaid diagrams. Call \
                 search_mermaid_docs before generating non-trivial diagrams, and \
                 validate_mermaid_diagram before returning Mermaid syntax to the user."
                    .to_string(),
            ),
        }
    }
}
