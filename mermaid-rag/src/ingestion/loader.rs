//! Fetches raw documents from a list of web locations.

use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use tracing::{debug, info};
use url::Url;

use crate::error::RetrievalError;
use crate::types::{Document, DocumentMetadata};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Elements whose text never belongs in the extracted document body.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Block-level elements that end a paragraph in the extracted text.
const PARAGRAPH_ELEMENTS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "table", "ul", "ol", "section",
    "article", "title",
];

/// Block-level elements that end a line in the extracted text.
const LINE_ELEMENTS: &[&str] = &["li", "tr", "br", "div", "header", "footer", "nav", "main"];

/// Fetches pages and reduces them to plain-text [`Document`]s.
///
/// Ingestion is an offline batch job, so the loader fails fast: the first
/// fetch or parse failure aborts the whole batch rather than silently
/// producing a partial corpus.
pub struct DocumentLoader {
    client: Client,
}

impl DocumentLoader {
    pub fn new() -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .user_agent(concat!("mermaid-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|err| RetrievalError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }

    /// Fetches every source in order and returns one document per source.
    pub async fn load(&self, sources: &[Url]) -> Result<Vec<Document>, RetrievalError> {
        let mut documents = Vec::with_capacity(sources.len());
        for url in sources {
            info!(source = %url, "fetching document");
            let body = self.fetch(url).await?;
            let document = parse_document(url, &body)?;
            debug!(
                source = %url,
                title = %document.metadata.title,
                chars = document.content.chars().count(),
                "extracted document text"
            );
            documents.push(document);
        }
        Ok(documents)
    }

    async fn fetch(&self, url: &Url) -> Result<String, RetrievalError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| fetch_error(url, err))?
            .error_for_status()
            .map_err(|err| fetch_error(url, err))?;
        response.text().await.map_err(|err| fetch_error(url, err))
    }
}

fn fetch_error(url: &Url, err: reqwest::Error) -> RetrievalError {
    if err.is_timeout() {
        RetrievalError::Timeout {
            operation: format!("fetch {url}"),
            seconds: FETCH_TIMEOUT.as_secs(),
        }
    } else {
        RetrievalError::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Parses fetched HTML into a document with title metadata and visible text.
fn parse_document(url: &Url, body: &str) -> Result<Document, RetrievalError> {
    let html = Html::parse_document(body);

    let mut raw = String::new();
    collect_text(*html.root_element(), &mut raw);
    let content = normalize_text(&raw);
    if content.is_empty() {
        return Err(RetrievalError::InvalidDocument(format!(
            "no textual content at {url}"
        )));
    }

    let title = extract_title(&html);
    Ok(Document::new(
        content,
        DocumentMetadata {
            source: url.to_string(),
            title,
        },
    ))
}

fn extract_title(html: &Html) -> String {
    let mut title = String::new();
    collect_element_text(*html.root_element(), "title", &mut title);
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_element_text(
    node: ego_tree::NodeRef<'_, scraper::Node>,
    name: &str,
    out: &mut String,
) {
    if let scraper::Node::Element(element) = node.value() {
        if element.name() == name {
            for child in node.children() {
                if let scraper::Node::Text(text) = child.value() {
                    out.push_str(&text);
                }
            }
            return;
        }
    }
    for child in node.children() {
        collect_element_text(child, name, out);
    }
}

/// Walks the DOM collecting text nodes, inserting line and paragraph breaks
/// after block-level elements so chunking can split on them later.
fn collect_text(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    match node.value() {
        scraper::Node::Text(text) => out.push_str(&text),
        scraper::Node::Element(element) => {
            let name = element.name();
            if SKIPPED_ELEMENTS.contains(&name) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
            if PARAGRAPH_ELEMENTS.contains(&name) {
                out.push_str("\n\n");
            } else if LINE_ELEMENTS.contains(&name) {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

/// Collapses runs of inline whitespace and blank lines so paragraphs are
/// separated by exactly one blank line.
fn normalize_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_pending = false;
    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !lines.is_empty() {
                blank_pending = true;
            }
        } else {
            if blank_pending {
                lines.push(String::new());
                blank_pending = false;
            }
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Document {
        let url = Url::parse("https://example.com/doc").unwrap();
        parse_document(&url, body).unwrap()
    }

    #[test]
    fn extracts_title_and_visible_text() {
        let document = parse(
            r#"<html><head><title>  Flowchart   Syntax </title>
            <script>var x = "hidden";</script></head>
            <body><h1>Flowcharts</h1><p>Nodes connect with arrows.</p>
            <style>.x { color: red; }</style></body></html>"#,
        );

        assert_eq!(document.metadata.title, "Flowchart Syntax");
        assert!(document.content.contains("Flowcharts"));
        assert!(document.content.contains("Nodes connect with arrows."));
        assert!(!document.content.contains("hidden"));
        assert!(!document.content.contains("color: red"));
    }

    #[test]
    fn block_elements_become_paragraph_breaks() {
        let document = parse(
            "<html><body><p>First paragraph.</p><p>Second paragraph.</p></body></html>",
        );
        assert_eq!(
            document.content,
            "First paragraph.\n\nSecond paragraph."
        );
    }

    #[test]
    fn whitespace_runs_are_collapsed() {
        let document = parse(
            "<html><body><p>spread   out\n\n\n\n   text</p></body></html>",
        );
        assert!(document.content.starts_with("spread out"));
        assert!(!document.content.contains("  "));
    }

    #[test]
    fn empty_page_is_rejected() {
        let url = Url::parse("https://example.com/empty").unwrap();
        let err = parse_document(&url, "<html><body><script>1</script></body></html>").unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidDocument(_)));
    }

    #[test]
    fn missing_title_yields_empty_metadata() {
        let document = parse("<html><body><p>content here</p></body></html>");
        assert_eq!(document.metadata.title, "");
    }
}
