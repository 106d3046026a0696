use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use rowgen_core::ApiKey;
use rowgen_engine::{OutputTarget, Pipeline, RunPlan, WindowOptions};
use rowgen_settings::RowgenSettings;
use rowgen_speech::{resolve_profiles, HttpSpeechService, SpeechConfig};
use rowgen_store::{OutputPolicy, SourceSpec};
use rowgen_telemetry::RunMetrics;

use crate::cli::SynthesizeArgs;

const INDEX_COLUMN: &str = "audio";
const FAILURE_LOG_NAME: &str = "skipped.csv";

/// One full pass per voice profile.
pub async fn execute(args: SynthesizeArgs, settings: &RowgenSettings, metrics: Arc<RunMetrics>) -> Result<()> {
    let profiles = resolve_profiles(&args.voices, args.voice_names.as_deref())?;

    let speech = &settings.speech;
    let api_key = match &speech.api_key_env {
        Some(var) => Some(ApiKey::from_env(var).with_context(|| format!("missing {var}"))?),
        None => None,
    };
    let config = SpeechConfig {
        base_url: args.base_url.clone().unwrap_or_else(|| speech.base_url.clone()),
        model: args.model.clone().unwrap_or_else(|| speech.model.clone()),
        language: args.language.clone().unwrap_or_else(|| speech.language.clone()),
        speed: args.speed.unwrap_or(speech.speed),
        sample_rate: args.sample_rate.unwrap_or(speech.sample_rate),
        ext: args.ext.clone().unwrap_or_else(|| speech.ext.clone()),
        timeout: Duration::from_secs(speech.timeout_secs),
        max_text_chars: speech.max_text_chars,
    };

    let window = WindowOptions {
        start_index: args.start_row,
        end_index: args.end_row,
        limit: args.limit,
        skip_if_output_exists: args.skip_existing,
    };
    let pipeline_config = crate::pipeline_config(settings, &args.batching, speech.batch_size, window)?;

    let source = SourceSpec::new(args.text_col.clone())
        .with_fallback(Some(args.fallback_col.clone()))
        .with_identifier(Some(args.id_col.clone()));

    for profile in profiles {
        let voice_dir = args.out_dir.join(&profile.name);
        info!(voice = %profile.name, source = %profile.describe(), dir = %voice_dir.display(), "voice pass");

        let label = format!("voice {}", profile.name);
        let service = HttpSpeechService::new(config.clone(), profile, &args.out_dir, api_key.clone())
            .context("building speech client")?;
        let pipeline = Pipeline::new(Arc::new(service), pipeline_config.clone(), Arc::clone(&metrics));

        let plan = RunPlan {
            input: args.input.clone(),
            source: source.clone(),
            output: args.index_output.as_ref().map(|name| OutputTarget {
                path: voice_dir.join(name),
                result_column: INDEX_COLUMN.into(),
                policy: OutputPolicy {
                    overwrite: false,
                    resume: true,
                },
            }),
            failure_log: voice_dir.join(FAILURE_LOG_NAME),
        };
        let summary = pipeline
            .run(&plan)
            .await
            .with_context(|| format!("synthesizing into {}", voice_dir.display()))?;
        crate::print_summary(&label, &summary);
    }
    Ok(())
}
