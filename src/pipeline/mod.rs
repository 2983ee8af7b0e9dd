//! Pipeline stages for a single conversion request.
//!
//! Each submodule implements exactly one concern, so each can be tested on
//! its own and the orchestration in [`crate::convert`] reads as a flat
//! sequence of stages.
//!
//! ## Data Flow
//!
//! ```text
//! plan ──▶ workspace ──▶ assets ──▶ engine ──▶ workspace
//! (headers) (write input) (fetch)   (tools)    (read output, teardown)
//! ```
//!
//! 1. [`plan`]      resolve formats, strategy and filter scripts
//! 2. [`workspace`] allocate the per-request directories and write the body
//! 3. [`assets`]    download the asset manifest concurrently
//! 4. [`engine`]    run the converter and/or the two compiler passes
//! 5. [`tools`]     shared process runner with a concurrency bound and deadline

use std::fmt;

pub mod assets;
pub mod engine;
pub mod plan;
pub mod tools;
pub mod workspace;

/// Lifecycle of one request.
///
/// ```text
/// Received → Validated → InputWritten → AssetsFetched → Converted → ResponseSent → CleanedUp
///                 └───────────┴──────────────┴────────────┴──▶ Failed ──▶ CleanedUp
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    InputWritten,
    AssetsFetched,
    Converted,
    ResponseSent,
    Failed,
    CleanedUp,
}

impl PipelineState {
    /// The state that follows a successful step from `self`.
    pub fn next(self) -> Self {
        use PipelineState::*;
        match self {
            Received => Validated,
            Validated => InputWritten,
            InputWritten => AssetsFetched,
            AssetsFetched => Converted,
            Converted => ResponseSent,
            ResponseSent | Failed | CleanedUp => CleanedUp,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Received => "received",
            PipelineState::Validated => "validated",
            PipelineState::InputWritten => "input written",
            PipelineState::AssetsFetched => "assets fetched",
            PipelineState::Converted => "converted",
            PipelineState::ResponseSent => "response sent",
            PipelineState::Failed => "failed",
            PipelineState::CleanedUp => "cleaned up",
        };
        f.write_str(s)
    }
}
