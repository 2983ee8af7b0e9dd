//! Error types for the docrelay service.
//!
//! Two types reflect the two points at which a request can fail:
//!
//! * [`DocRelayError`]: the underlying cause. Returned directly by the
//!   request dispatcher, where every failure is a validation failure and no
//!   workspace exists yet.
//!
//! * [`PipelineFailure`]: a [`DocRelayError`] raised after a workspace was
//!   allocated, paired with the last [`PipelineState`] the request reached.
//!   This is the failure half of [`crate::PipelineOutcome`].
//!
//! [`ErrorKind`] classifies both into the four families the HTTP layer maps
//! onto status codes.

use crate::pipeline::PipelineState;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors produced while dispatching or converting a request.
#[derive(Debug, Error)]
pub enum DocRelayError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Only POST carries a document to convert.
    #[error("Only POST is supported, got {method}")]
    MethodNotAllowed { method: String },

    /// A required header is absent.
    #[error("Missing required header '{name}'")]
    MissingHeader { name: &'static str },

    /// A header is present but is not valid visible ASCII.
    #[error("Header '{name}' is not valid text")]
    InvalidHeader { name: &'static str },

    /// No format token is known for the given media type.
    #[error("Unsupported media type '{media_type}' in header '{header}'")]
    UnsupportedMediaType {
        header: &'static str,
        media_type: String,
    },

    /// The format is known but cannot be used in this direction
    /// (e.g. PDF as an input).
    #[error("Cannot convert from '{from}' to '{to}'")]
    UnsupportedConversion { from: String, to: String },

    /// The `asset-collection` header is not a JSON array of `{url, name}`.
    #[error("Malformed asset-collection header: {reason}")]
    InvalidAssetManifest { reason: String },

    /// An asset destination name would escape the asset directory.
    #[error("Invalid asset name '{name}': must be a plain file name")]
    InvalidAssetName { name: String },

    /// Two assets share the same destination name.
    #[error("Duplicate asset name '{name}'")]
    DuplicateAssetName { name: String },

    /// The `filters` header is not a JSON array of strings.
    #[error("Malformed filters header: {reason}")]
    InvalidFilterList { reason: String },

    /// A filter identifier is not on the allowlist.
    #[error("Filter '{name}' is not allowed")]
    FilterNotAllowed { name: String },

    /// The body of an otherwise valid request is over the size limit, or
    /// could not be read to the end.
    #[error("Request body exceeds the {limit} byte limit or could not be read")]
    BodyTooLarge { limit: usize },

    // ── Asset errors ──────────────────────────────────────────────────────
    /// One or more assets could not be retrieved.
    #[error("{failed}/{total} assets could not be fetched:\n{details}")]
    AssetFetchFailed {
        failed: usize,
        total: usize,
        details: String,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external tool could not be started at all.
    #[error("Failed to start {tool} ('{program}'): {source}")]
    ToolSpawnFailed {
        tool: &'static str,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external tool exited with a failure status.
    #[error("{tool} finished with exit code {code}{}", diagnostics_suffix(.diagnostics))]
    ToolFailed {
        tool: &'static str,
        code: String,
        diagnostics: String,
    },

    /// The external tool did not finish before its deadline and was killed.
    #[error("{tool} timed out after {after:?} and was terminated")]
    ToolTimedOut { tool: &'static str, after: Duration },

    /// The LaTeX compiler ran both passes but produced no output file.
    #[error("{tool} produced no output file '{path}'{}", diagnostics_suffix(.diagnostics))]
    OutputMissing {
        tool: &'static str,
        path: PathBuf,
        diagnostics: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A filesystem operation inside the workspace failed.
    #[error("Failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converted document is larger than the configured buffer limit.
    #[error("Output '{path}' is {size} bytes, above the {limit} byte limit")]
    OutputTooLarge { path: PathBuf, size: u64, limit: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

/// The family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    AssetFetch,
    Conversion,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::AssetFetch => "asset fetch",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Io => "i/o",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl DocRelayError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use DocRelayError::*;
        match self {
            MethodNotAllowed { .. }
            | MissingHeader { .. }
            | InvalidHeader { .. }
            | UnsupportedMediaType { .. }
            | UnsupportedConversion { .. }
            | InvalidAssetManifest { .. }
            | InvalidAssetName { .. }
            | DuplicateAssetName { .. }
            | InvalidFilterList { .. }
            | FilterNotAllowed { .. }
            | BodyTooLarge { .. } => ErrorKind::Validation,
            AssetFetchFailed { .. } => ErrorKind::AssetFetch,
            ToolSpawnFailed { .. } | ToolFailed { .. } | ToolTimedOut { .. } | OutputMissing { .. } => {
                ErrorKind::Conversion
            }
            Io { .. } | OutputTooLarge { .. } => ErrorKind::Io,
            InvalidConfig(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`DocRelayError::Io`].
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocRelayError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// A pipeline error raised after the request was validated.
///
/// `state` is the last state the request completed before failing, so a
/// failure with `state == InputWritten` happened while fetching assets.
#[derive(Debug, Error)]
#[error("Conversion failed after {state}: {error}")]
pub struct PipelineFailure {
    pub state: PipelineState,
    #[source]
    pub error: DocRelayError,
}

impl PipelineFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
