use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use rowgen_core::ColumnRef;
use rowgen_settings::LogLevel;

/// Resumable batch enrichment and speech synthesis for tabular word lists.
#[derive(Parser, Debug)]
#[command(name = "rowgen", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (defaults to ~/.rowgen/settings.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add part-of-speech and meaning to every word through a chat API.
    Enrich(EnrichArgs),
    /// Synthesize one audio file per row and voice.
    Synthesize(SynthesizeArgs),
}

/// Batching and retry knobs shared by both commands. Unset values come
/// from settings.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Records per service call.
    #[arg(long)]
    pub batch: Option<usize>,

    /// Attempts per batch before falling back to per-record calls.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Backoff base in seconds; attempt k waits backoff * 2^k.
    #[arg(long)]
    pub backoff: Option<f64>,

    /// Pause between batches in seconds.
    #[arg(long)]
    pub sleep: Option<f64>,

    /// Log progress every N written rows (0 = off).
    #[arg(long)]
    pub log_every: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EnrichArgs {
    #[arg(long, default_value = "common_words_wid.csv")]
    pub input: PathBuf,

    #[arg(long, default_value = "common_words_wid_enriched.csv")]
    pub output: PathBuf,

    /// Maximum rows in the output (0 = no limit).
    #[arg(long, default_value_t = 0)]
    pub limit: u64,

    /// 1-based input row to start from.
    #[arg(long, default_value_t = 1)]
    pub start: u64,

    /// Last input row to process (0 = to the end).
    #[arg(long, default_value_t = 0)]
    pub end: u64,

    /// Maximum senses per word.
    #[arg(long)]
    pub senses: Option<u32>,

    /// Recompute the first N rows of an existing output in place.
    #[arg(long, value_name = "N")]
    pub rewrite_first: Option<u64>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub batching: BatchArgs,

    /// Replace an existing output.
    #[arg(long)]
    pub overwrite: bool,

    /// Append to an existing output (the default).
    #[arg(long, conflicts_with = "no_resume")]
    pub resume: bool,

    /// Refuse to touch an existing output.
    #[arg(long)]
    pub no_resume: bool,

    /// Text column, by header name or zero-based position.
    #[arg(long, default_value = "word")]
    pub column: ColumnRef,

    /// Column used when the text column is empty.
    #[arg(long)]
    pub fallback_column: Option<ColumnRef>,

    #[arg(long)]
    pub id_column: Option<ColumnRef>,

    /// Failure log path (defaults to <output stem>.failures.csv).
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SynthesizeArgs {
    #[arg(long, default_value = "words_id.csv")]
    pub input: PathBuf,

    #[arg(long, default_value = "tts_out")]
    pub out_dir: PathBuf,

    #[arg(long, default_value = "0")]
    pub text_col: ColumnRef,

    #[arg(long, default_value = "1")]
    pub fallback_col: ColumnRef,

    /// Column naming the audio files.
    #[arg(long, default_value = "2")]
    pub id_col: ColumnRef,

    #[arg(long, default_value_t = 1)]
    pub start_row: u64,

    /// 0 = to the end.
    #[arg(long, default_value_t = 0)]
    pub end_row: u64,

    /// Rows per voice (0 = all).
    #[arg(long, default_value_t = 0)]
    pub limit: u64,

    /// Skip rows whose audio file already exists.
    #[arg(long)]
    pub skip_existing: bool,

    /// `speaker:<name>` or comma-separated reference .wav files/directories.
    /// Repeat for several voices.
    #[arg(long = "voice", required = true)]
    pub voices: Vec<String>,

    /// Comma-separated folder names, one per voice.
    #[arg(long)]
    pub voice_names: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long)]
    pub speed: Option<f64>,

    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Audio file extension.
    #[arg(long)]
    pub ext: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    #[command(flatten)]
    pub batching: BatchArgs,

    /// Also write <out_dir>/<voice>/NAME listing each row with its audio path.
    #[arg(long, value_name = "NAME")]
    pub index_output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enrich_defaults() {
        let cli = Cli::parse_from(["rowgen", "enrich"]);
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert_eq!(args.column, ColumnRef::Name("word".into()));
        assert_eq!(args.start, 1);
        assert!(args.batching.batch.is_none());
        assert!(!args.resume && !args.no_resume);
    }

    #[test]
    fn resume_flags_conflict() {
        let err = Cli::try_parse_from(["rowgen", "enrich", "--resume", "--no-resume"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn synthesize_columns_are_positions() {
        let cli = Cli::parse_from([
            "rowgen",
            "--log-level",
            "debug",
            "synthesize",
            "--voice",
            "speaker:Ana Florence",
            "--voice",
            "refs/a.wav,refs/b.wav",
            "--id-col",
            "word_id",
        ]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        let Command::Synthesize(args) = cli.command else {
            panic!("expected synthesize");
        };
        assert_eq!(args.text_col, ColumnRef::Index(0));
        assert_eq!(args.id_col, ColumnRef::Name("word_id".into()));
        assert_eq!(args.voices.len(), 2);
    }

    #[test]
    fn synthesize_needs_a_voice() {
        assert!(Cli::try_parse_from(["rowgen", "synthesize"]).is_err());
    }
}
