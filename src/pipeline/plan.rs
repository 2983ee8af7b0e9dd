//! Conversion planning: decide which tools run and with which arguments.
//!
//! A [`ConversionPlan`] is derived purely from the request headers and the
//! service configuration; no filesystem or process work happens here, so a
//! plan that cannot be built is reported as a validation error before any
//! workspace exists.
//!
//! ## Strategy selection
//!
//! | input    | output | strategy |
//! |----------|--------|----------|
//! | LaTeX    | PDF    | [`Strategy::Compiler`]: two compiler passes, nothing else |
//! | other    | PDF    | [`Strategy::ConverterThenCompiler`]: converter to standalone LaTeX, then two compiler passes |
//! | any      | other  | [`Strategy::Converter`]: one converter run |

use crate::config::ServiceConfig;
use crate::error::DocRelayError;
use crate::media::{self, Format, LATEX};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

static FILTER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// Whether `name` is safe to turn into a file name: no separators, no dots.
pub fn is_valid_filter_name(name: &str) -> bool {
    FILTER_NAME.is_match(name)
}

/// How the engine produces the requested output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// General converter path: one converter invocation.
    Converter,
    /// Specialized compiler path: LaTeX source compiled to PDF directly.
    Compiler,
    /// PDF from a non-LaTeX source: the converter writes an intermediate
    /// LaTeX document which the compiler then turns into PDF.
    ConverterThenCompiler,
}

/// Everything the engine needs to know about one conversion.
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    /// Resolved source format.
    pub input: Format,
    /// Resolved requested format.
    pub output: Format,
    pub strategy: Strategy,
    /// Absolute paths of the filter scripts, in request order.
    pub filters: Vec<PathBuf>,
    /// The raw `Accept` value, echoed back as the response content type
    /// whatever the internal route was.
    pub output_media_type: String,
}

impl ConversionPlan {
    /// Resolve a plan from the `Content-Type` and `Accept` values and the
    /// requested filter identifiers.
    pub fn resolve(
        content_type: &str,
        accept: &str,
        filters: &[String],
        config: &ServiceConfig,
    ) -> Result<Self, DocRelayError> {
        let input = media::lookup(content_type).ok_or_else(|| {
            DocRelayError::UnsupportedMediaType {
                header: "content-type",
                media_type: media::essence(content_type),
            }
        })?;
        let output = media::lookup(accept).ok_or_else(|| DocRelayError::UnsupportedMediaType {
            header: "accept",
            media_type: media::essence(accept),
        })?;

        if !input.readable || !output.writable {
            return Err(DocRelayError::UnsupportedConversion {
                from: input.token.to_string(),
                to: output.token.to_string(),
            });
        }

        let strategy = match (input.is_latex(), output.is_pdf()) {
            (true, true) => Strategy::Compiler,
            (false, true) => Strategy::ConverterThenCompiler,
            (_, false) => Strategy::Converter,
        };

        let filters = filters
            .iter()
            .map(|name| resolve_filter(name, config))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            input,
            output,
            strategy,
            filters,
            output_media_type: accept.to_string(),
        })
    }

    /// Format token the converter writes, if the converter runs at all.
    pub fn converter_target(&self) -> Option<&'static str> {
        match self.strategy {
            Strategy::Converter => Some(self.output.token),
            Strategy::ConverterThenCompiler => Some(LATEX.token),
            Strategy::Compiler => None,
        }
    }

    /// Whether the compiler runs.
    pub fn uses_compiler(&self) -> bool {
        matches!(
            self.strategy,
            Strategy::Compiler | Strategy::ConverterThenCompiler
        )
    }

    /// File name of the input document inside the workspace.
    pub fn input_file_name(&self) -> String {
        format!("input.{}", self.input.extension)
    }

    /// File name of the final output inside the workspace output directory.
    pub fn output_file_name(&self) -> String {
        format!("{}.{}", OUTPUT_STEM, self.output.extension)
    }
}

/// Stem of every output file; also the compiler's job name.
pub const OUTPUT_STEM: &str = "output";

/// File name of the converter's LaTeX output on the two-stage PDF route.
pub const INTERMEDIATE_FILE_NAME: &str = "intermediate.tex";

fn resolve_filter(name: &str, config: &ServiceConfig) -> Result<PathBuf, DocRelayError> {
    // Both checks happen before any path is built from client input.
    if !is_valid_filter_name(name) || !config.is_filter_allowed(name) {
        return Err(DocRelayError::FilterNotAllowed {
            name: name.to_string(),
        });
    }
    Ok(config
        .filter_dir
        .join(format!("{}.{}", name, config.filter_extension)))
}
