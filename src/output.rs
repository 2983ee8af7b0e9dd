//! Result types for a successful conversion.

use serde::Serialize;

/// A converted document, fully buffered.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub bytes: Vec<u8>,
    /// The client's original `Accept` value, even when the document went
    /// through an intermediate format internally.
    pub media_type: String,
    pub stats: ConversionStats,
}

/// Per-request statistics, logged when a conversion completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub assets_fetched: usize,
    pub converter_runs: u32,
    pub compiler_runs: u32,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub total_duration_ms: u64,
}

impl ConversionStats {
    /// Total external process invocations.
    pub fn tool_invocations(&self) -> u32 {
        self.converter_runs + self.compiler_runs
    }
}
