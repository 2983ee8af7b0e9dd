//! # docrelay
//!
//! An HTTP document-conversion service. Clients POST a document and name its
//! media type in `Content-Type` and the one they want in `Accept`; the
//! service converts it with pandoc, or pdflatex for PDF output, and streams
//! back the result.
//!
//! ## Why a per-request workspace?
//!
//! Both tools operate on files, and LaTeX resolves `\includegraphics` and
//! friends relative to its working directory. Each request therefore gets a
//! private directory holding its input, downloaded assets and outputs, so
//! concurrent requests never see each other's files. The directory is removed
//! on every exit path.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Dispatch  method + headers → ConversionJob (400 on failure)
//!  ├─ 2. Allocate  unique workspace, write input body
//!  ├─ 3. Assets    parallel downloads from asset-collection header
//!  ├─ 4. Convert   pandoc | pdflatex ×2 | pandoc → latex → pdflatex ×2
//!  ├─ 5. Read      buffer the output document
//!  ├─ 6. Respond   200 with bytes, or 500 with diagnostics
//!  └─ 7. Teardown  remove the workspace, always
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docrelay::{serve, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .port(8080)
//!         .allowed_filters(["table", "heading_to_toc"])
//!         .build()?;
//!     serve(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docrelay` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod request;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use convert::{Converter, PipelineOutcome};
pub use error::{DocRelayError, ErrorKind, PipelineFailure};
pub use output::{ConversionOutput, ConversionStats};
pub use pipeline::PipelineState;
pub use request::{dispatch, AssetSpec, ConversionJob, ConversionRequest, PendingJob};
pub use server::{router, serve, AppState};
