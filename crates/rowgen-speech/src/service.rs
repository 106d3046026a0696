use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use rowgen_core::{ApiKey, ArtifactLayout, GenerationService, Payload, Record, ServiceError};

use crate::error::SpeechError;
use crate::voice::{VoiceProfile, VoiceSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct SpeechConfig {
    pub base_url: String,
    pub model: String,
    pub language: String,
    pub speed: f64,
    pub sample_rate: u32,
    /// Artifact extension, also sent as the requested audio format.
    pub ext: String,
    pub timeout: Duration,
    pub max_text_chars: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8020".into(),
            model: "xtts_v2".into(),
            language: "ar".into(),
            speed: 1.0,
            sample_rate: 22_050,
            ext: "wav".into(),
            timeout: Duration::from_secs(300),
            max_text_chars: 400,
        }
    }
}

#[derive(Serialize)]
struct VoiceBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_wavs: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    model: &'a str,
    texts: Vec<&'a str>,
    voice: VoiceBody<'a>,
    language: &'a str,
    speed: f64,
    sample_rate: u32,
    format: &'a str,
}

/// Audio synthesis for one voice profile over HTTP.
///
/// Each returned clip is written to `<out_dir>/<voice>/<stem>.<ext>`
/// through a temp file, so an interrupted write never leaves a partial
/// artifact that a later `skip_existing` run would trust.
pub struct HttpSpeechService {
    client: Client,
    config: SpeechConfig,
    voice: VoiceProfile,
    layout: ArtifactLayout,
    api_key: Option<ApiKey>,
    endpoint: String,
}

impl HttpSpeechService {
    pub fn new(
        config: SpeechConfig,
        voice: VoiceProfile,
        out_dir: &Path,
        api_key: Option<ApiKey>,
    ) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SpeechError::Client(e.to_string()))?;
        let layout = ArtifactLayout::new(out_dir.join(&voice.name), config.ext.clone());
        let endpoint = format!("{}/synthesize", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            voice,
            layout,
            api_key,
            endpoint,
        })
    }

    pub fn voice(&self) -> &VoiceProfile {
        &self.voice
    }

    fn request<'a>(&'a self, batch: &'a [Record]) -> SynthesizeRequest<'a> {
        let voice = match &self.voice.source {
            VoiceSource::Speaker(name) => VoiceBody {
                speaker: Some(name.as_str()),
                reference_wavs: None,
            },
            VoiceSource::References(wavs) => VoiceBody {
                speaker: None,
                reference_wavs: Some(wavs.iter().map(|p| p.display().to_string()).collect()),
            },
        };
        SynthesizeRequest {
            model: &self.config.model,
            texts: batch.iter().map(|r| r.resolved_text.as_str()).collect(),
            voice,
            language: &self.config.language,
            speed: self.config.speed,
            sample_rate: self.config.sample_rate,
            format: &self.layout.extension,
        }
    }

    fn decode_clips(raw: &str, expected: usize) -> Result<Vec<Vec<u8>>, ServiceError> {
        let data: Value = serde_json::from_str(raw)
            .map_err(|e| ServiceError::MalformedResponse(format!("response is not JSON: {e}")))?;
        if let Some(error) = data.get("error") {
            return Err(ServiceError::ApiError(error.to_string()));
        }
        let clips = data
            .get("audio")
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::MalformedResponse("missing audio array".into()))?;
        if clips.len() != expected {
            return Err(ServiceError::CountMismatch {
                expected,
                actual: clips.len(),
            });
        }
        clips
            .iter()
            .enumerate()
            .map(|(i, clip)| {
                let encoded = clip.as_str().ok_or_else(|| {
                    ServiceError::MalformedResponse(format!("audio[{i}] is not a string"))
                })?;
                STANDARD
                    .decode(encoded)
                    .map_err(|e| ServiceError::MalformedResponse(format!("audio[{i}]: {e}")))
            })
            .collect()
    }

    fn write_artifact(&self, record: &Record, bytes: &[u8]) -> Result<PathBuf, ServiceError> {
        let path = self.layout.path_for(record);
        let write_err = |e: std::io::Error| ServiceError::ArtifactWrite {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        std::fs::create_dir_all(self.layout.dir()).map_err(write_err)?;
        let mut tmp = NamedTempFile::new_in(self.layout.dir()).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        Ok(path)
    }
}

#[async_trait]
impl GenerationService for HttpSpeechService {
    fn name(&self) -> &str {
        "speech"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn precheck(&self, record: &Record) -> Result<(), String> {
        let chars = record.resolved_text.chars().count();
        if chars > self.config.max_text_chars {
            return Err(format!(
                "text_too_long:{chars}>{}",
                self.config.max_text_chars
            ));
        }
        Ok(())
    }

    fn artifact_layout(&self) -> Option<&ArtifactLayout> {
        Some(&self.layout)
    }

    #[instrument(skip_all, fields(voice = %self.voice.name, size = batch.len()))]
    async fn generate(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError> {
        let mut req = self.client.post(&self.endpoint).json(&self.request(batch));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", key.bearer());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout(self.config.timeout)
            } else {
                ServiceError::NetworkError(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, body));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| ServiceError::NetworkError(e.to_string()))?;
        let clips = Self::decode_clips(&raw, batch.len())?;

        let mut out = Vec::with_capacity(clips.len());
        for (record, clip) in batch.iter().zip(clips) {
            let path = self.write_artifact(record, &clip)?;
            debug!(index = record.index, path = %path.display(), bytes = clip.len(), "artifact written");
            out.push(Payload::Artifact(path));
        }
        Ok(out)
    }
}
