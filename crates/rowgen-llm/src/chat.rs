use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use rowgen_core::{normalize_item, ApiKey, GenerationService, Payload, Record, ServiceError};

use crate::prompt::{extract_json_array, system_prompt, user_prompt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint and sampling parameters for [`ChatEnrichmentService`].
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
    pub senses: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            timeout: Duration::from_secs(120),
            max_tokens: 800,
            temperature: 0.2,
            senses: 1,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    stream: bool,
}

/// Word enrichment over an OpenAI-compatible chat-completions endpoint.
///
/// One request per batch; the model answers with a JSON array holding one
/// `"<pos>：<sense>"` item per word, which is normalized into
/// [`Payload::Text`].
pub struct ChatEnrichmentService {
    client: Client,
    config: ChatConfig,
    api_key: ApiKey,
    endpoint: String,
}

impl ChatEnrichmentService {
    pub fn new(config: ChatConfig, api_key: ApiKey) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::NetworkError(format!("http client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            api_key,
            endpoint,
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn classify_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.config.timeout)
        } else {
            ServiceError::NetworkError(e.to_string())
        }
    }

    /// Turn a successful HTTP body into one normalized item per word.
    fn parse_body(&self, raw: &str, expected: usize) -> Result<Vec<Payload>, ServiceError> {
        let data: Value = serde_json::from_str(raw.trim_start())
            .map_err(|e| ServiceError::MalformedResponse(format!("response is not JSON: {e}")))?;

        if let Some(error) = data.get("error") {
            return Err(ServiceError::ApiError(error.to_string()));
        }

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::MalformedResponse("missing choices[0].message.content".into())
            })?;

        let items = extract_json_array(content).ok_or_else(|| {
            ServiceError::MalformedResponse("model output is not a JSON array".into())
        })?;

        if items.len() != expected {
            return Err(ServiceError::CountMismatch {
                expected,
                actual: items.len(),
            });
        }

        Ok(items
            .into_iter()
            .map(|item| Payload::Text(normalize_item(item)))
            .collect())
    }
}

#[async_trait]
impl GenerationService for ChatEnrichmentService {
    fn name(&self) -> &str {
        "chat"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, size = batch.len()))]
    async fn generate(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError> {
        let system = system_prompt(self.config.senses);
        let user = user_prompt(batch.iter().map(|r| r.resolved_text.as_str()));
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.config.temperature,
            top_p: 1.0,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", self.api_key.bearer())
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match ServiceError::from_status(status, body) {
                ServiceError::RateLimited { .. } => ServiceError::RateLimited { retry_after },
                other => other,
            });
        }

        let raw = resp.text().await.map_err(|e| self.classify_send_error(e))?;
        debug!(status, bytes = raw.len(), "chat response received");
        self.parse_body(&raw, batch.len())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
