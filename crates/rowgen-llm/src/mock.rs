use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use rowgen_core::{ArtifactLayout, GenerationService, Payload, Record, ServiceError};

/// Pre-programmed behaviour for one call, for deterministic tests without
/// a live endpoint.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Answer every record with `"<text>::ok"`, or write an artifact when
    /// the mock has a layout.
    Echo,
    /// Return exactly these texts, whatever the batch size.
    Texts(Vec<String>),
    /// Fail the call.
    Error(ServiceError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::Texts(texts.into_iter().map(Into::into).collect())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One observed `generate` call.
#[derive(Clone, Debug)]
pub struct MockCall {
    pub texts: Vec<String>,
    pub indices: Vec<u64>,
    pub at: Instant,
}

/// Scripted generation service.
///
/// Responses are consumed in call order; once the script runs out every
/// call gets the fallback (`Echo` unless changed). Records whose text is
/// poisoned make any call containing them fail with
/// [`ServiceError::ItemRejected`].
pub struct MockService {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    poisoned: HashSet<String>,
    max_chars: Option<usize>,
    layout: Option<ArtifactLayout>,
    calls: Mutex<Vec<MockCall>>,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockService {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: MockResponse::Echo,
            poisoned: HashSet::new(),
            max_chars: None,
            layout: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn echo() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: MockResponse) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_poisoned(mut self, text: impl Into<String>) -> Self {
        self.poisoned.insert(text.into());
        self
    }

    /// Reject longer texts in `precheck`.
    pub fn with_max_chars(mut self, max: usize) -> Self {
        self.max_chars = Some(max);
        self
    }

    /// Write one artifact per record under `layout` instead of returning text.
    pub fn with_artifacts(mut self, layout: ArtifactLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Batch size of every call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().iter().map(|c| c.texts.len()).collect()
    }

    /// Expected echo text for an input.
    pub fn echo_text(text: &str) -> String {
        format!("{text}::ok")
    }

    fn echo_batch(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError> {
        if let Some(bad) = batch.iter().find(|r| self.poisoned.contains(&r.resolved_text)) {
            return Err(ServiceError::ItemRejected(format!(
                "cannot process {:?}",
                bad.resolved_text
            )));
        }
        batch
            .iter()
            .map(|record| match &self.layout {
                Some(layout) => {
                    let path = layout.path_for(record);
                    std::fs::create_dir_all(layout.dir())
                        .and_then(|()| std::fs::write(&path, record.resolved_text.as_bytes()))
                        .map_err(|e| ServiceError::ArtifactWrite {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })?;
                    Ok(Payload::Artifact(path))
                }
                None => Ok(Payload::Text(Self::echo_text(&record.resolved_text))),
            })
            .collect()
    }
}

#[async_trait]
impl GenerationService for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn precheck(&self, record: &Record) -> Result<(), String> {
        match self.max_chars {
            Some(max) if record.resolved_text.chars().count() > max => {
                Err(format!("text_too_long:{}", record.resolved_text.chars().count()))
            }
            _ => Ok(()),
        }
    }

    fn artifact_layout(&self) -> Option<&ArtifactLayout> {
        self.layout.as_ref()
    }

    async fn generate(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError> {
        self.calls.lock().push(MockCall {
            texts: batch.iter().map(|r| r.resolved_text.clone()).collect(),
            indices: batch.iter().map(|r| r.index).collect(),
            at: Instant::now(),
        });

        let mut current = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        loop {
            match current {
                MockResponse::Echo => return self.echo_batch(batch),
                MockResponse::Texts(texts) => {
                    return Ok(texts.into_iter().map(Payload::Text).collect())
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
