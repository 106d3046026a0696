//! # rowgen
//!
//! Command-line entry point: loads settings, installs telemetry and runs
//! one of the pipeline commands on a single-threaded runtime.

#![deny(unsafe_code)]

mod cli;
mod enrich;
mod synthesize;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use rowgen_core::RetryPolicy;
use rowgen_engine::{PipelineConfig, RunSummary, WindowOptions};
use rowgen_settings::{LogLevel, RowgenSettings};
use rowgen_telemetry::{init_telemetry, TelemetryConfig};

use crate::cli::{BatchArgs, Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = match &cli.config {
        Some(path) => rowgen_settings::load_settings_from_explicit_path(path),
        None => rowgen_settings::load_settings(),
    }
    .context("loading settings")?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if cli.log_json {
        settings.logging.json = true;
    }

    let telemetry = init_telemetry(telemetry_config(&settings));
    let metrics = telemetry.metrics();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let result = runtime.block_on(async {
        match cli.command {
            Command::Enrich(args) => enrich::execute(args, &settings, metrics.clone()).await,
            Command::Synthesize(args) => {
                synthesize::execute(args, &settings, metrics.clone()).await
            }
        }
    });
    metrics.log_summary();
    result
}

fn telemetry_config(settings: &RowgenSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: tracing_level(settings.logging.level),
        module_levels: settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.clone(), tracing_level(*level)))
            .collect(),
        json: settings.logging.json,
    }
}

fn tracing_level(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Trace => tracing::Level::TRACE,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

/// Merge CLI batching flags over settings.
pub(crate) fn pipeline_config(
    settings: &RowgenSettings,
    args: &BatchArgs,
    default_batch: usize,
    window: WindowOptions,
) -> Result<PipelineConfig> {
    let batch_size = args.batch.unwrap_or(default_batch);
    if batch_size == 0 {
        anyhow::bail!("--batch must be >= 1");
    }
    let sleep = args.sleep.unwrap_or(settings.pipeline.sleep_secs);
    if !sleep.is_finite() || sleep < 0.0 {
        anyhow::bail!("--sleep must be a non-negative number of seconds");
    }
    let backoff = args.backoff.unwrap_or(settings.retry.backoff_secs);
    if !backoff.is_finite() || backoff < 0.0 {
        anyhow::bail!("--backoff must be a non-negative number of seconds");
    }

    Ok(PipelineConfig {
        batch_size,
        window,
        pacing: Duration::from_secs_f64(sleep),
        log_every: args.log_every.unwrap_or(settings.pipeline.log_every),
        retry: RetryPolicy::from_secs_f64(
            args.retries.unwrap_or(settings.retry.max_attempts),
            backoff,
        ),
    })
}

pub(crate) fn print_summary(label: &str, summary: &RunSummary) {
    println!(
        "{label}: admitted {}, written {}, failed {}, skipped {} ({} batches, {} retries, {} degraded)",
        summary.admitted,
        summary.written,
        summary.failed,
        summary.skipped,
        summary.batches,
        summary.retries,
        summary.degraded_batches,
    );
}
