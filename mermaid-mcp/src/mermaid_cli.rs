//! Bounded subprocess wrapper around the Mermaid CLI (`mmdc`).
//!
//! Validation and rendering both shell out to the CLI against a scratch
//! directory. Every invocation is bounded: on timeout the child process is
//! killed and a structured report is returned instead of hanging the tool
//! call. Tool callers always receive a report, never a raw error.

use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 8;

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    #[default]
    Svg,
    Png,
    Pdf,
}

impl RenderFormat {
    fn extension(self) -> &'static str {
        match self {
            RenderFormat::Svg => "svg",
            RenderFormat::Png => "png",
            RenderFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            RenderFormat::Svg => "image/svg+xml",
            RenderFormat::Png => "image/png",
            RenderFormat::Pdf => "application/pdf",
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RenderTheme {
    #[default]
    Default,
    Dark,
    Neutral,
    Forest,
}

impl RenderTheme {
    fn as_arg(self) -> &'static str {
        match self {
            RenderTheme::Default => "default",
            RenderTheme::Dark => "dark",
            RenderTheme::Neutral => "neutral",
            RenderTheme::Forest => "forest",
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackground {
    #[default]
    Transparent,
    White,
}

impl RenderBackground {
    fn as_arg(self) -> &'static str {
        match self {
            RenderBackground::Transparent => "transparent",
            RenderBackground::White => "white",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub format: RenderFormat,
    pub theme: RenderTheme,
    pub background: RenderBackground,
    pub timeout: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: RenderFormat::default(),
            theme: RenderTheme::default(),
            background: RenderBackground::default(),
            timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS),
        }
    }
}

/// Outcome of a syntax validation run.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }
}

/// Outcome of a render run. On success `data_base64` holds the encoded
/// artifact; on failure only `error` is populated.
#[derive(Debug, Serialize)]
pub struct RenderReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<RenderFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderReport {
    fn rendered(format: RenderFormat, bytes: Vec<u8>) -> Self {
        Self {
            success: true,
            format: Some(format),
            mime_type: Some(format.mime_type()),
            data_base64: Some(BASE64.encode(bytes)),
            error: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            format: None,
            mime_type: None,
            data_base64: None,
            error: Some(message.into()),
        }
    }
}

enum CliOutcome {
    /// Process finished within the bound.
    Completed {
        status_success: bool,
        stderr: String,
        artifact: Option<Vec<u8>>,
    },
    TimedOut,
    Missing,
    Failed(String),
}

/// Handle to the `mmdc` binary.
#[derive(Clone, Debug)]
pub struct MermaidCli {
    binary: String,
}

impl Default for MermaidCli {
    fn default() -> Self {
        Self::new("mmdc")
    }
}

impl MermaidCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks diagram syntax by asking the CLI for a throwaway SVG render.
    pub async fn validate(&self, mermaid_code: &str) -> ValidationReport {
        match self.invoke(mermaid_code, "svg", &[], VALIDATE_TIMEOUT).await {
            CliOutcome::Completed {
                status_success: true,
                ..
            } => ValidationReport::ok(),
            CliOutcome::Completed { stderr, .. } => {
                // The CLI writes all syntax errors to stderr.
                if stderr.is_empty() {
                    ValidationReport::invalid("unknown Mermaid CLI error")
                } else {
                    ValidationReport::invalid(stderr)
                }
            }
            CliOutcome::TimedOut => ValidationReport::invalid("Mermaid validation timed out"),
            CliOutcome::Missing => ValidationReport::invalid(self.missing_message()),
            CliOutcome::Failed(message) => ValidationReport::invalid(message),
        }
    }

    /// Renders a diagram to the requested format, returning the encoded
    /// artifact.
    pub async fn render(&self, mermaid_code: &str, options: &RenderOptions) -> RenderReport {
        let mut extra_args = vec!["-t".to_string(), options.theme.as_arg().to_string()];
        if options.background != RenderBackground::Transparent {
            extra_args.push("-b".to_string());
            extra_args.push(options.background.as_arg().to_string());
        }

        match self
            .invoke(
                mermaid_code,
                options.format.extension(),
                &extra_args,
                options.timeout,
            )
            .await
        {
            CliOutcome::Completed {
                status_success: true,
                artifact: Some(bytes),
                ..
            } => RenderReport::rendered(options.format, bytes),
            CliOutcome::Completed {
                status_success: true,
                artifact: None,
                ..
            } => RenderReport::failure("Mermaid CLI reported success but produced no output file"),
            CliOutcome::Completed { stderr, .. } => {
                if stderr.is_empty() {
                    RenderReport::failure("Mermaid CLI failed to render diagram")
                } else {
                    RenderReport::failure(stderr)
                }
            }
            CliOutcome::TimedOut => RenderReport::failure("Mermaid rendering timed out"),
            CliOutcome::Missing => RenderReport::failure(self.missing_message()),
            CliOutcome::Failed(message) => RenderReport::failure(message),
        }
    }

    fn missing_message(&self) -> String {
        format!(
            "Mermaid CLI ({}) is not installed or not available in PATH",
            self.binary
        )
    }

    async fn invoke(
        &self,
        mermaid_code: &str,
        extension: &str,
        extra_args: &[String],
        bound: Duration,
    ) -> CliOutcome {
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                return CliOutcome::Failed(format!("failed to create scratch directory: {err}"));
            }
        };
        let input_file = scratch.path().join("diagram.mmd");
        let output_file = scratch.path().join(format!("diagram.{extension}"));

        if let Err(err) = tokio::fs::write(&input_file, mermaid_code).await {
            return CliOutcome::Failed(format!("failed to write diagram source: {err}"));
        }

        let spawned = Command::new(&self.binary)
            .arg("-i")
            .arg(&input_file)
            .arg("-o")
            .arg(&output_file)
            .arg("--quiet")
            .args(extra_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the timeout drops the wait future, the child must not
            // outlive the tool call.
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(binary = %self.binary, "mermaid cli binary not found");
                return CliOutcome::Missing;
            }
            Err(err) => {
                return CliOutcome::Failed(format!("failed to launch {}: {err}", self.binary));
            }
        };

        match timeout(bound, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let artifact = if output.status.success() {
                    tokio::fs::read(&output_file).await.ok()
                } else {
                    None
                };
                CliOutcome::Completed {
                    status_success: output.status.success(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    artifact,
                }
            }
            Ok(Err(err)) => {
                CliOutcome::Failed(format!("{} produced no output: {err}", self.binary))
            }
            Err(_) => {
                warn!(binary = %self.binary, bound_secs = bound.as_secs(), "mermaid cli timed out");
                CliOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_yields_structured_validation_failure() {
        let cli = MermaidCli::new("definitely-not-a-real-mermaid-binary");
        let report = cli.validate("graph LR\nA --> B").await;

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("not installed"));
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_binary_yields_structured_render_failure() {
        let cli = MermaidCli::new("definitely-not-a-real-mermaid-binary");
        let report = cli.render("graph LR\nA --> B", &RenderOptions::default()).await;

        assert!(!report.success);
        assert!(report.data_base64.is_none());
        assert!(report.error.as_deref().unwrap().contains("not installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_binary_is_killed_at_the_bound() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-mmdc");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = MermaidCli::new(script.to_string_lossy().into_owned());
        let outcome = cli
            .invoke("graph LR\nA --> B", "svg", &[], Duration::from_millis(200))
            .await;

        assert!(matches!(outcome, CliOutcome::TimedOut));
    }

    #[test]
    fn render_arguments_map_to_cli_flags() {
        assert_eq!(RenderTheme::Forest.as_arg(), "forest");
        assert_eq!(RenderBackground::White.as_arg(), "white");
        assert_eq!(RenderFormat::Png.extension(), "png");
        assert_eq!(RenderFormat::Pdf.mime_type(), "application/pdf");
    }

    #[test]
    fn enums_deserialize_from_lowercase_wire_values() {
        assert_eq!(
            serde_json::from_str::<RenderFormat>("\"png\"").unwrap(),
            RenderFormat::Png
        );
        assert_eq!(
            serde_json::from_str::<RenderTheme>("\"dark\"").unwrap(),
            RenderTheme::Dark
        );
        assert_eq!(
            serde_json::from_str::<RenderBackground>("\"white\"").unwrap(),
            RenderBackground::White
        );
    }
}
