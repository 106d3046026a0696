//! Advisory resume manifest kept next to an aggregated output.
//!
//! The row count of the output is the authoritative resume point. The
//! manifest refines it with the input index of the last consumed record,
//! which differs from the row count as soon as records are excluded
//! (empty text, prechecks, per-record failures), and with the byte length
//! at that commit, so an uncommitted tail can be cut off on resume.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;

const MANIFEST_SUFFIX: &str = ".progress.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeManifest {
    pub header: Vec<String>,
    /// Data rows in the output when the manifest was written.
    pub rows: u64,
    /// Input index of the last record consumed by a durable batch.
    pub last_index: u64,
    /// Output length in bytes at that commit. Anything past it was never
    /// committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeManifest {
    pub fn new(header: Vec<String>, rows: u64, last_index: u64) -> Self {
        Self {
            header,
            rows,
            last_index,
            bytes: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// `<output>.progress.json`
    pub fn path_for(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(MANIFEST_SUFFIX);
        PathBuf::from(name)
    }

    /// Read the manifest for `output`. Unreadable manifests are ignored.
    pub fn load(output: &Path) -> Option<Self> {
        let path = Self::path_for(output);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable resume manifest");
                None
            }
        }
    }

    /// Whether the manifest describes the output as it is on disk now.
    pub fn matches(&self, header: &[String], rows: u64) -> bool {
        self.header == header && self.rows == rows
    }

    /// Replace the manifest atomically.
    pub fn save(&self, output: &Path) -> Result<(), StoreError> {
        let path = Self::path_for(output);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path)
            .map_err(|e| StoreError::Persistence(format!("{}: {}", path.display(), e.error)))?;
        debug!(rows = self.rows, last_index = self.last_index, "resume manifest saved");
        Ok(())
    }

    pub fn remove(output: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(Self::path_for(output)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<String> {
        vec!["word".into(), "meaning".into()]
    }

    #[test]
    fn path_appends_suffix() {
        assert_eq!(
            ResumeManifest::path_for(Path::new("out/words.csv")),
            PathBuf::from("out/words.csv.progress.json")
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");
        let manifest = ResumeManifest::new(header(), 9, 12).with_bytes(120);
        manifest.save(&output).unwrap();

        let loaded = ResumeManifest::load(&output).unwrap();
        assert_eq!(loaded, manifest);
        assert!(loaded.matches(&header(), 9));
        assert!(!loaded.matches(&header(), 10));
    }

    #[test]
    fn manifest_without_bytes_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");
        std::fs::write(
            ResumeManifest::path_for(&output),
            r#"{"header":["word","meaning"],"rows":3,"lastIndex":4,"updatedAt":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let loaded = ResumeManifest::load(&output).unwrap();
        assert_eq!(loaded.bytes, None);
        assert_eq!(loaded.last_index, 4);
    }

    #[test]
    fn garbage_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");
        std::fs::write(ResumeManifest::path_for(&output), "{not json").unwrap();
        assert!(ResumeManifest::load(&output).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");
        ResumeManifest::remove(&output).unwrap();
        ResumeManifest::new(header(), 1, 1).save(&output).unwrap();
        ResumeManifest::remove(&output).unwrap();
        assert!(!ResumeManifest::path_for(&output).exists());
    }
}
