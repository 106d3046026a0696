//! Orchestrator: source → filter → batch → invoke → sink / failure log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use rowgen_core::{GenerationService, ItemOutcome, Record, RetryPolicy};
use rowgen_store::{
    plan_output, FailureLog, OpenMode, OutputPolicy, OutputSink, RowSource, SourceSpec,
};
use rowgen_telemetry::RunMetrics;

use crate::batch::BatchAccumulator;
use crate::error::PipelineError;
use crate::invoker::{Invocation, ServiceInvoker};
use crate::window::{skip_target, Admission, WindowFilter, WindowOptions};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub window: WindowOptions,
    /// Pause between consecutive batches.
    pub pacing: Duration,
    /// Progress line every this many written rows; 0 disables it.
    pub log_every: u64,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            window: WindowOptions::default(),
            pacing: Duration::ZERO,
            log_every: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// Aggregated output for a run.
#[derive(Clone, Debug)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub result_column: String,
    pub policy: OutputPolicy,
}

/// Everything one pass over an input needs besides the service.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub input: PathBuf,
    pub source: SourceSpec,
    /// `None` when results live only as artifacts.
    pub output: Option<OutputTarget>,
    pub failure_log: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub admitted: u64,
    pub written: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches: u64,
    pub retries: u64,
    pub degraded_batches: u64,
}

impl RunSummary {
    pub(crate) fn absorb(&mut self, invocation: &Invocation) {
        self.batches += 1;
        self.retries += u64::from(invocation.retries);
        if invocation.degraded {
            self.degraded_batches += 1;
        }
    }
}

pub struct Pipeline {
    invoker: ServiceInvoker,
    config: PipelineConfig,
    metrics: Arc<RunMetrics>,
}

/// Mutable per-run state threaded through batch flushes.
struct RunState {
    sink: Option<OutputSink>,
    failures: FailureLog,
    summary: RunSummary,
    pacer: Pacer,
    next_progress: u64,
    /// Precheck rejections not yet covered by a commit.
    rejected: Vec<(Record, String)>,
}

/// Enforces the pause between batches; the first batch goes out at once.
pub(crate) struct Pacer {
    pause: Duration,
    started: bool,
}

impl Pacer {
    pub(crate) fn new(pause: Duration) -> Self {
        Self {
            pause,
            started: false,
        }
    }

    pub(crate) async fn wait(&mut self) {
        if self.started && !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
        self.started = true;
    }
}

impl Pipeline {
    pub fn new(service: Arc<dyn GenerationService>, config: PipelineConfig, metrics: Arc<RunMetrics>) -> Self {
        let invoker = ServiceInvoker::new(service, config.retry.clone(), Arc::clone(&metrics));
        Self {
            invoker,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<dyn GenerationService> {
        self.invoker.service()
    }

    pub(crate) fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Pace, then invoke one batch and fold its counters into `summary`.
    pub(crate) async fn dispatch(
        &self,
        batch: &[Record],
        pacer: &mut Pacer,
        summary: &mut RunSummary,
    ) -> Result<Invocation, PipelineError> {
        pacer.wait().await;
        self.metrics.record_batch();
        let invocation = self.invoker.invoke(batch).await?;
        summary.absorb(&invocation);
        Ok(invocation)
    }

    /// One full pass over `plan.input`.
    ///
    /// Every configuration problem (bad window, missing column, schema
    /// mismatch, short input) is reported before the output is opened.
    #[instrument(skip_all, fields(service = self.service().name(), input = %plan.input.display()))]
    pub async fn run(&self, plan: &RunPlan) -> Result<RunSummary, PipelineError> {
        let mut filter = WindowFilter::new(self.config.window.clone())?;
        let mut source = RowSource::open(&plan.input, &plan.source)?;

        let output_plan = match &plan.output {
            Some(target) => {
                let mut header = source.header().to_vec();
                header.push(target.result_column.clone());
                Some(plan_output(&target.path, &header, target.policy)?)
            }
            None => None,
        };

        let start = self.config.window.start_index;
        let resume_point = output_plan.as_ref().map_or(0, |p| p.resume_point());
        if start > 1 && resume_point > 0 && start - 1 != resume_point {
            warn!(
                start_index = start,
                resume_point,
                "start index and existing output disagree, skipping to the further point"
            );
        }
        let skip = skip_target(start, resume_point);
        source.skip_exact(skip)?;

        if let Some(p) = output_plan.as_ref().filter(|p| p.mode == OpenMode::Append) {
            filter = filter.with_admitted(p.existing_rows);
        }

        let sink = output_plan.as_ref().map(OutputSink::open).transpose()?;
        info!(
            skip,
            batch_size = self.config.batch_size,
            output = ?sink.as_ref().map(|s| s.path().display().to_string()),
            "run started"
        );

        let mut state = RunState {
            sink,
            failures: FailureLog::new(&plan.failure_log),
            summary: RunSummary::default(),
            pacer: Pacer::new(self.config.pacing),
            next_progress: self.config.log_every,
            rejected: Vec::new(),
        };
        let mut batches = BatchAccumulator::new(self.config.batch_size);
        let layout = self.service().artifact_layout();

        for record in &mut source {
            let record = record?;
            match filter.check(&record, layout) {
                Admission::Stop => break,
                Admission::Skip(reason) => {
                    debug!(row = record.index, ?reason, "record skipped");
                    state.summary.skipped += 1;
                    self.metrics.record_skipped(1);
                }
                Admission::Admit => {
                    if let Err(reason) = self.service().precheck(&record) {
                        warn!(row = record.index, %reason, "record rejected before dispatch");
                        state.rejected.push((record, reason));
                        state.summary.failed += 1;
                        self.metrics.record_failed(1);
                        continue;
                    }
                    filter.admit();
                    state.summary.admitted += 1;
                    if let Some(batch) = batches.push(record) {
                        self.flush(batch, &mut state).await?;
                    }
                }
            }
        }
        if let Some(batch) = batches.finish() {
            self.flush(batch, &mut state).await?;
        }
        if let Some(last_index) = state.rejected.last().map(|(r, _)| r.index) {
            if let Some(sink) = state.sink.as_mut() {
                sink.commit(last_index)?;
            }
            let rejected = std::mem::take(&mut state.rejected);
            log_failures(&mut state.failures, rejected, Vec::new())?;
        }

        let summary = state.summary;
        info!(
            admitted = summary.admitted,
            written = summary.written,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            output_rows = ?state.sink.as_ref().map(OutputSink::rows),
            failure_log_entries = state.failures.entries(),
            "run finished"
        );
        Ok(summary)
    }

    async fn flush(&self, batch: Vec<Record>, state: &mut RunState) -> Result<(), PipelineError> {
        let Some(last_index) = batch.last().map(|r| r.index) else {
            return Ok(());
        };
        let invocation = self
            .dispatch(&batch, &mut state.pacer, &mut state.summary)
            .await?;

        let mut written = 0;
        let mut failures = Vec::new();
        for (record, outcome) in batch.iter().zip(&invocation.outcomes) {
            match outcome {
                ItemOutcome::Success(payload) => {
                    if let Some(sink) = state.sink.as_mut() {
                        sink.write_row(&record.fields, &payload.cell())?;
                    }
                    written += 1;
                }
                ItemOutcome::Failure(reason) => failures.push((record, reason.as_str())),
            }
        }
        if let Some(sink) = state.sink.as_mut() {
            sink.commit(last_index)?;
        }
        let failed = failures.len() as u64;
        let rejected = std::mem::take(&mut state.rejected);
        log_failures(&mut state.failures, rejected, failures)?;

        state.summary.written += written;
        state.summary.failed += failed;
        self.metrics.record_written(written);
        self.metrics.record_failed(failed);

        debug!(size = batch.len(), written, failed, last_index, "batch committed");
        if self.config.log_every > 0 && state.summary.written >= state.next_progress {
            info!(
                written = state.summary.written,
                failed = state.summary.failed,
                last_index,
                "progress"
            );
            while state.next_progress <= state.summary.written {
                state.next_progress += self.config.log_every;
            }
        }
        Ok(())
    }
}

/// Write failure-log entries in input order. Called only after the commit
/// that covers every listed record.
fn log_failures(
    log: &mut FailureLog,
    rejected: Vec<(Record, String)>,
    failed: Vec<(&Record, &str)>,
) -> Result<(), PipelineError> {
    let mut entries: Vec<(&Record, &str)> = rejected
        .iter()
        .map(|(record, reason)| (record, reason.as_str()))
        .chain(failed)
        .collect();
    entries.sort_by_key(|(record, _)| record.index);
    for (record, reason) in entries {
        log.record(record, reason)?;
    }
    Ok(())
}
