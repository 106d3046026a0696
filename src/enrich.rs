use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use rowgen_core::ApiKey;
use rowgen_engine::{OutputTarget, Pipeline, RewriteRequest, RunPlan, WindowOptions};
use rowgen_llm::{ChatConfig, ChatEnrichmentService};
use rowgen_settings::RowgenSettings;
use rowgen_store::{FailureLog, OutputPolicy, SourceSpec};
use rowgen_telemetry::RunMetrics;

use crate::cli::EnrichArgs;

const RESULT_COLUMN: &str = "meaning_pos";

pub async fn execute(args: EnrichArgs, settings: &RowgenSettings, metrics: Arc<RunMetrics>) -> Result<()> {
    let key_var = &settings.service.api_key_env;
    let api_key = ApiKey::from_env(key_var).with_context(|| format!("missing {key_var}"))?;

    let chat = ChatConfig {
        base_url: args.base_url.clone().unwrap_or_else(|| settings.service.base_url.clone()),
        model: args.model.clone().unwrap_or_else(|| settings.service.model.clone()),
        timeout: Duration::from_secs(args.timeout.unwrap_or(settings.service.timeout_secs)),
        max_tokens: settings.service.max_tokens,
        temperature: settings.service.temperature,
        senses: args.senses.unwrap_or(settings.service.senses).max(1),
    };
    info!(model = %chat.model, base_url = %chat.base_url, senses = chat.senses, "text service configured");
    let service = ChatEnrichmentService::new(chat, api_key).context("building chat client")?;

    let window = WindowOptions {
        start_index: args.start,
        end_index: args.end,
        limit: args.limit,
        skip_if_output_exists: false,
    };
    let config = crate::pipeline_config(settings, &args.batching, settings.pipeline.batch_size, window)?;
    let pipeline = Pipeline::new(Arc::new(service), config, metrics);

    let source = SourceSpec::new(args.column.clone())
        .with_fallback(args.fallback_column.clone())
        .with_identifier(args.id_column.clone());
    let failure_log = args
        .failure_log
        .clone()
        .unwrap_or_else(|| FailureLog::default_path_for(&args.output));

    if let Some(count) = args.rewrite_first {
        let request = RewriteRequest {
            input: args.input,
            source,
            output: args.output.clone(),
            result_column: RESULT_COLUMN.into(),
            count,
            failure_log,
        };
        let result = pipeline
            .rewrite_first(&request)
            .await
            .with_context(|| format!("rewriting {}", args.output.display()))?;
        crate::print_summary("rewrite", &result.summary);
        println!("backup: {}", result.backup.display());
        return Ok(());
    }

    let policy = output_policy(&args);
    let plan = RunPlan {
        input: args.input,
        source,
        output: Some(OutputTarget {
            path: args.output.clone(),
            result_column: RESULT_COLUMN.into(),
            policy,
        }),
        failure_log,
    };
    let summary = pipeline
        .run(&plan)
        .await
        .with_context(|| format!("enriching into {}", args.output.display()))?;
    crate::print_summary("enrich", &summary);
    println!("output: {}", args.output.display());
    Ok(())
}

/// Resume unless told otherwise; `--overwrite --resume` is rejected by the
/// output planner.
fn output_policy(args: &EnrichArgs) -> OutputPolicy {
    OutputPolicy {
        overwrite: args.overwrite,
        resume: args.resume || (!args.no_resume && !args.overwrite),
    }
}
