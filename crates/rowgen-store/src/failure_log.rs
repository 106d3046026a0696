use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use rowgen_core::Record;

use crate::error::StoreError;
use crate::output::csv_writer;

pub const FAILURE_LOG_HEADER: [&str; 4] = ["row_index", "row_id", "text", "reason"];

/// Append-only side channel for skipped and failed records.
///
/// Nothing is created until the first entry. Each entry is flushed before
/// `record` returns; the handle is closed when the log is dropped.
pub struct FailureLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    entries: u64,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            entries: 0,
        }
    }

    /// `<dir>/<output stem>.failures.csv`
    pub fn default_path_for(output: &Path) -> PathBuf {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        output.with_file_name(format!("{stem}.failures.csv"))
    }

    pub fn record(&mut self, record: &Record, reason: &str) -> Result<(), StoreError> {
        let index = record.index.to_string();
        let row = [
            index.as_str(),
            record.row_id(),
            record.resolved_text.as_str(),
            reason,
        ];
        let writer = self.writer()?;
        writer.write_record(row)?;
        writer.flush()?;
        self.entries += 1;
        Ok(())
    }

    /// Entries written during this run.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, StoreError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let is_new = std::fs::metadata(&self.path)
                .map(|m| m.len() == 0)
                .unwrap_or(true);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut writer = csv_writer(file);
            if is_new {
                writer.write_record(FAILURE_LOG_HEADER)?;
            }
            debug!(path = %self.path.display(), "failure log opened");
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::Persistence("failure log unavailable".into()))
    }
}
