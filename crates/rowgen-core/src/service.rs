use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::record::{Payload, Record};

/// Where a file-producing service puts the artifact for each record:
/// `<dir>/<identifier or row_N>.<extension>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub dir: PathBuf,
    pub extension: String,
}

impl ArtifactLayout {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn path_for(&self, record: &Record) -> PathBuf {
        self.dir
            .join(format!("{}.{}", record.artifact_stem(), self.extension))
    }

    pub fn exists_for(&self, record: &Record) -> bool {
        self.path_for(record).exists()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Trait implemented by each external generation backend (text enrichment,
/// speech synthesis).
///
/// `generate` receives a non-empty batch and must return one payload per
/// record, in order. Anything else is reported by the caller as a count
/// mismatch.
#[async_trait]
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Cheap local check run before a record is admitted. An `Err` carries
    /// the reason written to the failure log.
    fn precheck(&self, _record: &Record) -> Result<(), String> {
        Ok(())
    }

    /// Present when the service writes one file per record.
    fn artifact_layout(&self) -> Option<&ArtifactLayout> {
        None
    }

    async fn generate(&self, batch: &[Record]) -> Result<Vec<Payload>, ServiceError>;
}
