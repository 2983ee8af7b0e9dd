//! CLI binary for docrelay.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables to `ServiceConfig` and runs the server.

use anyhow::{Context, Result};
use clap::Parser;
use docrelay::{serve, ServiceConfig};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"REQUESTS:
  POST any path with the document as the body.
    Content-Type      media type of the body (e.g. text/markdown)
    Accept            media type to produce (e.g. application/pdf)
    asset-collection  optional JSON: [{"url": "https://...", "name": "logo.png"}]
    filters           optional JSON: ["table", "heading_to_toc"]

EXAMPLES:
  docrelay --port 8080
  curl -X POST localhost:8080 -H 'Content-Type: text/markdown' \
       -H 'Accept: application/pdf' --data-binary @doc.md -o doc.pdf

ENVIRONMENT:
  PANDOC     Path to the pandoc executable
  PDFLATEX   Path to the pdflatex executable
  PORT       Listening port
  RUST_LOG   Overrides the log filter (e.g. docrelay=debug,tower_http=debug)
"#;

/// Convert documents over HTTP with pandoc and pdflatex.
#[derive(Parser, Debug)]
#[command(
    name = "docrelay",
    version,
    about = "Convert documents over HTTP with pandoc and pdflatex",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "DOCRELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    port: u16,

    /// pandoc executable.
    #[arg(long, env = "PANDOC", default_value = "pandoc")]
    pandoc: PathBuf,

    /// pdflatex executable.
    #[arg(long, env = "PDFLATEX", default_value = "pdflatex")]
    pdflatex: PathBuf,

    /// Directory for per-request workspaces [default: system temp dir].
    #[arg(long, env = "DOCRELAY_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Directory holding filter scripts.
    #[arg(long, env = "DOCRELAY_FILTER_DIR", default_value = "filters")]
    filter_dir: PathBuf,

    /// Extension of filter scripts.
    #[arg(long, env = "DOCRELAY_FILTER_EXTENSION", default_value = "py")]
    filter_extension: String,

    /// Filters clients may request (comma-separated).
    #[arg(
        long,
        env = "DOCRELAY_ALLOWED_FILTERS",
        value_delimiter = ',',
        default_value = "heading_to_toc,table"
    )]
    allowed_filters: Vec<String>,

    /// Maximum external tool processes at once [default: CPU count].
    #[arg(long, env = "DOCRELAY_MAX_CONCURRENT_TOOLS")]
    max_concurrent_tools: Option<usize>,

    /// Per-invocation tool deadline in seconds.
    #[arg(long, env = "DOCRELAY_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// Per-asset download timeout in seconds.
    #[arg(long, env = "DOCRELAY_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Maximum request body in bytes.
    #[arg(long, env = "DOCRELAY_MAX_BODY_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Maximum converted document in bytes.
    #[arg(long, env = "DOCRELAY_MAX_OUTPUT_BYTES", default_value_t = 100 * 1024 * 1024)]
    max_output_bytes: u64,

    /// Maximum size of one downloaded asset in bytes.
    #[arg(long, env = "DOCRELAY_MAX_ASSET_BYTES", default_value_t = 25 * 1024 * 1024)]
    max_asset_bytes: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCRELAY_VERBOSE")]
    verbose: bool,

    /// Log errors only.
    #[arg(short, long, env = "DOCRELAY_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .host(self.host.clone())
            .port(self.port)
            .pandoc_path(self.pandoc.clone())
            .pdflatex_path(self.pdflatex.clone())
            .filter_dir(self.filter_dir.clone())
            .filter_extension(self.filter_extension.clone())
            .allowed_filters(self.allowed_filters.iter().map(|f| f.trim().to_string()))
            .tool_timeout_secs(self.tool_timeout)
            .download_timeout_secs(self.download_timeout)
            .max_body_bytes(self.max_body_bytes)
            .max_output_bytes(self.max_output_bytes)
            .max_asset_bytes(self.max_asset_bytes);
        if let Some(root) = &self.workspace_root {
            builder = builder.workspace_root(root.clone());
        }
        if let Some(n) = self.max_concurrent_tools {
            builder = builder.max_concurrent_tools(n);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "docrelay=debug,tower_http=debug,info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Serve ────────────────────────────────────────────────────────────
    let config = cli.to_config()?;
    let addr = config.bind_addr();
    serve(config)
        .await
        .with_context(|| format!("docrelay failed while serving on {addr}"))?;
    Ok(())
}
