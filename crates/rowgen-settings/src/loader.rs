//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RowgenSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogLevel, RowgenSettings};

/// Resolve the default settings file (`~/.rowgen/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".rowgen").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RowgenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from an explicitly requested file, which must exist.
pub fn load_settings_from_explicit_path(path: &Path) -> Result<RowgenSettings> {
    if !path.exists() {
        return Err(SettingsError::InvalidValue(format!(
            "settings file {} does not exist",
            path.display()
        )));
    }
    load_settings_from_path(path)
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RowgenSettings> {
    let defaults = serde_json::to_value(RowgenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RowgenSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RowgenSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` to read variables.
///
/// `DEEPSEEK_MODEL` and `DEEPSEEK_BASE_URL` are honoured for the text
/// service; the `ROWGEN_*` variables win over them. Invalid values are
/// warned about and ignored.
pub fn apply_overrides_from<F>(settings: &mut RowgenSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Text service ────────────────────────────────────────────────
    if let Some(v) = env.string("DEEPSEEK_BASE_URL") {
        settings.service.base_url = v;
    }
    if let Some(v) = env.string("DEEPSEEK_MODEL") {
        settings.service.model = v;
    }
    if let Some(v) = env.string("ROWGEN_BASE_URL") {
        settings.service.base_url = v;
    }
    if let Some(v) = env.string("ROWGEN_MODEL") {
        settings.service.model = v;
    }
    if let Some(v) = env.string("ROWGEN_API_KEY_ENV") {
        settings.service.api_key_env = v;
    }
    if let Some(v) = env.u64("ROWGEN_TIMEOUT_SECS", 1, 3600) {
        settings.service.timeout_secs = v;
    }
    if let Some(v) = env.u64("ROWGEN_SENSES", 1, 10) {
        settings.service.senses = v as u32;
    }

    // ── Retry and pipeline ──────────────────────────────────────────
    if let Some(v) = env.u64("ROWGEN_MAX_ATTEMPTS", 1, 20) {
        settings.retry.max_attempts = v as u32;
    }
    if let Some(v) = env.f64("ROWGEN_BACKOFF_SECS", 0.0, 600.0) {
        settings.retry.backoff_secs = v;
    }
    if let Some(v) = env.u64("ROWGEN_BATCH_SIZE", 1, 1000) {
        settings.pipeline.batch_size = v as usize;
    }
    if let Some(v) = env.f64("ROWGEN_SLEEP_SECS", 0.0, 3600.0) {
        settings.pipeline.sleep_secs = v;
    }
    if let Some(v) = env.u64("ROWGEN_LOG_EVERY", 0, 1_000_000) {
        settings.pipeline.log_every = v;
    }

    // ── Speech service ──────────────────────────────────────────────
    if let Some(v) = env.string("ROWGEN_SPEECH_URL") {
        settings.speech.base_url = v;
    }
    if let Some(v) = env.string("ROWGEN_SPEECH_MODEL") {
        settings.speech.model = v;
    }
    if let Some(v) = env.string("ROWGEN_SPEECH_API_KEY_ENV") {
        settings.speech.api_key_env = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ROWGEN_LOG_LEVEL") {
        match v.parse::<LogLevel>() {
            Ok(level) => settings.logging.level = level,
            Err(e) => warn!(key = "ROWGEN_LOG_LEVEL", value = %v, error = %e, "ignoring"),
        }
    }
    if let Some(v) = env.bool("ROWGEN_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = self.string(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid number env var, ignoring");
        }
        result
    }
}
