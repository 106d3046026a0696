//! Building blocks for destructive in-place rewrites: loading the current
//! table, a verbatim backup, and an atomically persisted replacement.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::StoreError;
use crate::output::{csv_writer, read_header, table_reader, BOM};

const BACKUP_SUFFIX: &str = ".bak_rewrite";

/// An existing output held in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl OutputTable {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut reader = table_reader(path)?;
        let header = read_header(&mut reader, path)?;
        if header.is_empty() {
            return Err(StoreError::Input(format!("{} is empty", path.display())));
        }
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| StoreError::Input(format!("{}: {e}", path.display())))?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            if row.len() < header.len() {
                row.resize(header.len(), String::new());
            }
            rows.push(row);
        }
        Ok(Self { header, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

/// `<output>.bak_rewrite`
pub fn backup_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `output` byte for byte to its backup path, replacing an older backup.
pub fn backup_file(output: &Path) -> Result<PathBuf, StoreError> {
    let backup = backup_path(output);
    std::fs::copy(output, &backup).map_err(|e| {
        StoreError::Persistence(format!(
            "backup {} -> {}: {e}",
            output.display(),
            backup.display()
        ))
    })?;
    info!(backup = %backup.display(), "backup written");
    Ok(backup)
}

/// CSV writer that targets a temp file next to the destination and only
/// replaces the destination on [`finish`](Self::finish). Dropping it
/// unfinished removes the temp file and leaves the destination untouched.
pub struct AtomicCsvWriter {
    writer: csv::Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let final_path = final_path.as_ref().to_path_buf();
        let parent = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(parent).map_err(|e| {
            StoreError::Persistence(format!("temporary file in {}: {e}", parent.display()))
        })?;
        let mut buf = BufWriter::new(temp);
        buf.write_all(BOM.as_bytes())?;
        Ok(Self {
            writer: csv_writer(buf),
            final_path,
        })
    }

    pub fn write_row(&mut self, row: &[String]) -> Result<(), StoreError> {
        self.writer.write_record(row)?;
        Ok(())
    }

    /// Flush, sync and atomically replace the destination.
    pub fn finish(self) -> Result<PathBuf, StoreError> {
        let buf = self
            .writer
            .into_inner()
            .map_err(|e| StoreError::Persistence(format!("flush: {}", e.error())))?;
        let temp = buf
            .into_inner()
            .map_err(|e| StoreError::Persistence(format!("flush: {}", e.error())))?;
        temp.as_file().sync_data()?;
        temp.persist(&self.final_path).map_err(|e| {
            StoreError::Persistence(format!("persist {}: {}", self.final_path.display(), e.error))
        })?;
        Ok(self.final_path)
    }
}
