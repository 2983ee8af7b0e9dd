//! Pipeline orchestration for one validated request.
//!
//! [`Converter::convert`] runs the stages in order, each returning a typed
//! `Result`; the first error short-circuits. Whatever happens, the workspace
//! is torn down before the outcome is returned. The output is buffered in
//! memory at that point, so removing the workspace before the response is
//! written loses nothing.

use crate::config::ServiceConfig;
use crate::error::{DocRelayError, PipelineFailure};
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::assets::AssetFetcher;
use crate::pipeline::engine::Engine;
use crate::pipeline::workspace::Workspace;
use crate::pipeline::PipelineState;
use crate::request::ConversionJob;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Terminal result of one request, consumed once by the response emitter.
pub type PipelineOutcome = Result<ConversionOutput, PipelineFailure>;

/// Shared, cheaply cloneable conversion service.
#[derive(Debug, Clone)]
pub struct Converter {
    config: Arc<ServiceConfig>,
    fetcher: AssetFetcher,
    engine: Engine,
}

impl Converter {
    pub fn new(config: ServiceConfig) -> Result<Self, DocRelayError> {
        let fetcher = AssetFetcher::new(config.download_timeout_secs, config.max_asset_bytes)?;
        let engine = Engine::new(&config);
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            engine,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run a validated job through the pipeline.
    ///
    /// The workspace is already gone when this returns, so the state log
    /// shows `cleaned up` before the caller's `response sent`. Nothing is
    /// lost by that order: the outcome owns the fully buffered output.
    pub async fn convert(&self, job: ConversionJob) -> PipelineOutcome {
        let span = info_span!("conversion", request_id = %job.id);
        self.run(job).instrument(span).await
    }

    async fn run(&self, job: ConversionJob) -> PipelineOutcome {
        let start = Instant::now();
        info!(
            "Converting {} → {} ({:?})",
            job.plan.input.token, job.plan.output.token, job.plan.strategy
        );

        let state = PipelineState::Validated;
        let workspace =
            match Workspace::allocate(&self.config.workspace_root, job.id, &job.plan).await {
                Ok(ws) => ws,
                Err(error) => return Err(fail(state, error)),
            };

        let result = self.run_stages(&job, &workspace, start).await;

        workspace.teardown().await;
        debug!("State: {}", PipelineState::CleanedUp);

        match &result {
            Ok(output) => info!(
                "Conversion complete: {} bytes, {} assets, {} tool runs, {}ms",
                output.stats.output_bytes,
                output.stats.assets_fetched,
                output.stats.tool_invocations(),
                output.stats.total_duration_ms
            ),
            Err(failure) => error!("Error during conversion: {}", failure),
        }
        result
    }

    async fn run_stages(
        &self,
        job: &ConversionJob,
        workspace: &Workspace,
        start: Instant,
    ) -> PipelineOutcome {
        let mut state = PipelineState::Validated;

        workspace
            .write_input(&job.request.body)
            .await
            .map_err(|e| fail(state, e))?;
        state = advance(state);

        let assets_fetched = self
            .fetcher
            .fetch_all(&job.request.assets, workspace.asset_dir())
            .await
            .map_err(|e| fail(state, e))?;
        state = advance(state);

        let report = self
            .engine
            .run(&job.plan, workspace)
            .await
            .map_err(|e| fail(state, e))?;
        state = advance(state);

        let bytes = workspace
            .read_output(self.config.max_output_bytes)
            .await
            .map_err(|e| fail(state, e))?;

        let stats = ConversionStats {
            assets_fetched,
            converter_runs: report.converter_runs,
            compiler_runs: report.compiler_runs,
            input_bytes: job.request.body.len(),
            output_bytes: bytes.len(),
            total_duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok(ConversionOutput {
            bytes,
            media_type: job.plan.output_media_type.clone(),
            stats,
        })
    }
}

fn advance(state: PipelineState) -> PipelineState {
    let next = state.next();
    debug!("State: {}", next);
    next
}

fn fail(state: PipelineState, error: DocRelayError) -> PipelineFailure {
    debug!("State: {} (from {})", PipelineState::Failed, state);
    PipelineFailure { state, error }
}
