//! Conversion engine: drive pandoc and pdflatex for a [`ConversionPlan`].
//!
//! ## Converter (pandoc)
//!
//! One invocation with explicit `-f` / `-t` tokens, one `--filter` per
//! allowlisted filter script, and the workspace input and output paths. Any
//! non-zero exit fails the request with the captured stderr attached.
//!
//! ## Compiler (pdflatex)
//!
//! Two passes, always, with identical arguments: the first writes the `.aux`
//! and `.toc` files, the second typesets the document using them. pdflatex
//! exits non-zero on plenty of benign warnings, so its exit code is ignored
//! and success means one thing only: the PDF exists after the second pass.
//! This is the only place in the service where an exit code is not trusted.

use crate::config::ServiceConfig;
use crate::error::DocRelayError;
use crate::media::LATEX;
use crate::pipeline::plan::{ConversionPlan, Strategy, OUTPUT_STEM};
use crate::pipeline::tools::{tail, ToolOutput, ToolRunner};
use crate::pipeline::workspace::Workspace;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONVERTER: &str = "pandoc";
pub const COMPILER: &str = "pdflatex";

/// Number of compiler passes per document.
pub const COMPILER_PASSES: u32 = 2;

/// Trailing bytes of the compiler's `.log` attached when no PDF was produced.
const LOG_TAIL_BYTES: usize = 4 * 1024;

/// What the engine did for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub converter_runs: u32,
    pub compiler_runs: u32,
}

#[derive(Debug, Clone)]
pub struct Engine {
    pandoc: PathBuf,
    pdflatex: PathBuf,
    runner: ToolRunner,
}

impl Engine {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            pandoc: config.pandoc_path.clone(),
            pdflatex: config.pdflatex_path.clone(),
            runner: ToolRunner::new(config.max_concurrent_tools, config.tool_timeout),
        }
    }

    /// Run the plan's strategy inside `workspace`.
    ///
    /// On success the document is at [`Workspace::output_path`].
    pub async fn run(
        &self,
        plan: &ConversionPlan,
        workspace: &Workspace,
    ) -> Result<EngineReport, DocRelayError> {
        let mut report = EngineReport::default();
        match plan.strategy {
            Strategy::Converter => {
                self.convert(plan, plan.output.token, workspace.output_path(), false, workspace)
                    .await?;
                report.converter_runs += 1;
            }
            Strategy::Compiler => {
                info!("Using {} to convert LaTeX to PDF directly", COMPILER);
                report.compiler_runs += self.compile(workspace.input_path(), workspace).await?;
            }
            Strategy::ConverterThenCompiler => {
                let intermediate = workspace.intermediate_path();
                self.convert(plan, LATEX.token, &intermediate, true, workspace)
                    .await?;
                report.converter_runs += 1;
                report.compiler_runs += self.compile(&intermediate, workspace).await?;
            }
        }
        Ok(report)
    }

    async fn convert(
        &self,
        plan: &ConversionPlan,
        to: &str,
        output: &Path,
        standalone: bool,
        workspace: &Workspace,
    ) -> Result<(), DocRelayError> {
        let args = converter_args(
            plan.input.token,
            to,
            standalone,
            &plan.filters,
            workspace.input_path(),
            output,
        );
        let out = self
            .runner
            .run(CONVERTER, &self.pandoc, &args, workspace.asset_dir())
            .await?;
        if !out.success() {
            return Err(DocRelayError::ToolFailed {
                tool: CONVERTER,
                code: out.code(),
                diagnostics: out.diagnostics(),
            });
        }
        Ok(())
    }

    /// Both compiler passes; returns the number of passes run.
    async fn compile(&self, source: &Path, workspace: &Workspace) -> Result<u32, DocRelayError> {
        let args = compiler_args(source, workspace.output_dir());
        let mut last: Option<ToolOutput> = None;

        for pass in 1..=COMPILER_PASSES {
            let out = self
                .runner
                .run(COMPILER, &self.pdflatex, &args, workspace.asset_dir())
                .await?;
            if !out.success() {
                // Exit status is not a success signal for pdflatex.
                debug!(
                    "{} pass {} exited with {}; ignored",
                    COMPILER,
                    pass,
                    out.code()
                );
            }
            last = Some(out);
        }

        let produced = tokio::fs::try_exists(workspace.output_path())
            .await
            .unwrap_or(false);
        if produced {
            return Ok(COMPILER_PASSES);
        }

        let mut diagnostics = last.map(|o| o.diagnostics()).unwrap_or_default();
        let log_path = workspace.output_dir().join(format!("{OUTPUT_STEM}.log"));
        if let Ok(log) = tokio::fs::read_to_string(&log_path).await {
            if !diagnostics.trim().is_empty() {
                diagnostics.push('\n');
            }
            diagnostics.push_str(tail(&log, LOG_TAIL_BYTES));
        }
        Err(DocRelayError::OutputMissing {
            tool: COMPILER,
            path: workspace.output_path().to_path_buf(),
            diagnostics,
        })
    }
}

/// `pandoc -f <from> -t <to> [--standalone] [--filter <script>]... -o <output> <input>`
pub fn converter_args(
    from: &str,
    to: &str,
    standalone: bool,
    filters: &[PathBuf],
    input: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-f".into(), from.into(), "-t".into(), to.into()];
    if standalone {
        args.push("--standalone".into());
    }
    for filter in filters {
        args.push("--filter".into());
        args.push(filter.into());
    }
    args.push("-o".into());
    args.push(output.into());
    args.push(input.into());
    args
}

/// Identical for both passes. Batch mode keeps pdflatex from waiting on
/// stdin; the output directory keeps aux files inside the workspace.
pub fn compiler_args(source: &Path, output_dir: &Path) -> Vec<OsString> {
    vec![
        "-interaction=batchmode".into(),
        "-no-shell-escape".into(),
        "-jobname".into(),
        OUTPUT_STEM.into(),
        "-output-directory".into(),
        output_dir.into(),
        source.into(),
    ]
}
