//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section has `#[serde(default)]`
//! so a partial file only needs the values it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "service": { "model": "deepseek-chat", "senses": 2 },
///   "retry": { "maxAttempts": 5 },
///   "logging": { "level": "debug", "modules": { "rowgen_llm": "trace" } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RowgenSettings {
    /// Text-enrichment service.
    pub service: ServiceSettings,
    /// Batch retry schedule.
    pub retry: RetrySettings,
    /// Batching, pacing and progress reporting.
    pub pipeline: PipelineSettings,
    /// Speech-synthesis service.
    pub speech: SpeechSettings,
    pub logging: LoggingSettings,
}

/// Chat-completions endpoint used by `enrich`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Maximum senses requested per word.
    pub senses: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            timeout_secs: 120,
            max_tokens: 800,
            temperature: 0.2,
            senses: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Attempts per batch, first call included.
    pub max_attempts: u32,
    /// Backoff base in seconds; attempt `k` waits `base * 2^k`.
    pub backoff_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 2.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub batch_size: usize,
    /// Pause between batch flushes in seconds.
    pub sleep_secs: f64,
    /// Log progress every N written records (0 = off).
    pub log_every: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            sleep_secs: 0.0,
            log_every: 50,
        }
    }
}

/// Synthesis endpoint used by `synthesize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSettings {
    pub base_url: String,
    pub model: String,
    /// Optional environment variable holding a bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub language: String,
    pub speed: f64,
    pub sample_rate: u32,
    /// Artifact file extension.
    pub ext: String,
    pub batch_size: usize,
    /// Longer texts are rejected before reaching the service.
    pub max_text_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8020".to_string(),
            model: "xtts_v2".to_string(),
            api_key_env: None,
            language: "ar".to_string(),
            speed: 1.0,
            sample_rate: 22_050,
            ext: "wav".to_string(),
            batch_size: 2,
            max_text_chars: 400,
            timeout_secs: 300,
        }
    }
}

/// Log level for the tracing subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"rowgen_llm": "debug"}`.
    pub modules: BTreeMap<String, LogLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = RowgenSettings::default();
        assert_eq!(s.service.model, "deepseek-chat");
        assert_eq!(s.service.api_key_env, "DEEPSEEK_API_KEY");
        assert_eq!(s.service.max_tokens, 800);
        assert_eq!(s.retry.max_attempts, 3);
        assert!((s.retry.backoff_secs - 2.0).abs() < f64::EPSILON);
        assert_eq!(s.pipeline.batch_size, 10);
        assert_eq!(s.speech.sample_rate, 22_050);
        assert_eq!(s.logging.level, LogLevel::Info);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RowgenSettings::default()).unwrap();
        assert!(json["service"]["apiKeyEnv"].is_string());
        assert!(json["pipeline"]["logEvery"].is_number());
        assert!(json["speech"].get("apiKeyEnv").is_none());
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
    }
}
