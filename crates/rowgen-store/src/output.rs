//! Output Sink: incremental, crash-safe tabular output.
//!
//! Inspection happens in [`plan_output`], which never touches the file
//! system beyond reading. Only [`OutputSink::open`] creates, truncates or
//! appends, so every configuration problem surfaces before mutation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::manifest::ResumeManifest;

pub(crate) const BOM: &str = "\u{feff}";

/// How an existing output is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputPolicy {
    pub overwrite: bool,
    pub resume: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Create (or truncate) and write the header.
    Create,
    /// Append to an existing output whose header matched.
    Append,
}

/// Result of inspecting the output before a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPlan {
    pub path: PathBuf,
    pub header: Vec<String>,
    pub mode: OpenMode,
    /// Data rows already present.
    pub existing_rows: u64,
    /// Last consumed input index from a manifest that matched the output.
    pub resume_index: Option<u64>,
    /// Length to cut an appended output back to before writing. Set when the
    /// file ends in bytes no commit accounted for.
    pub truncate_to: Option<u64>,
}

impl OutputPlan {
    /// Number of input records already accounted for by the output.
    pub fn resume_point(&self) -> u64 {
        self.resume_index.unwrap_or(self.existing_rows)
    }
}

/// Inspect `path` and decide how the run will write to it.
pub fn plan_output(
    path: &Path,
    expected_header: &[String],
    policy: OutputPolicy,
) -> Result<OutputPlan, StoreError> {
    let fresh = OutputPlan {
        path: path.to_owned(),
        header: expected_header.to_vec(),
        mode: OpenMode::Create,
        existing_rows: 0,
        resume_index: None,
        truncate_to: None,
    };

    if policy.overwrite && policy.resume {
        return Err(StoreError::Config(
            "overwrite and resume cannot be combined".into(),
        ));
    }
    if !path.exists() || policy.overwrite {
        return Ok(fresh);
    }
    if !policy.resume {
        return Err(StoreError::Config(format!(
            "output {} already exists; resume or overwrite it explicitly",
            path.display()
        )));
    }

    let Some(table) = inspect_table(path)? else {
        debug!(path = %path.display(), "existing output is empty, recreating");
        return Ok(fresh);
    };
    if table.header != expected_header {
        return Err(StoreError::SchemaMismatch {
            path: path.display().to_string(),
            expected: expected_header.to_vec(),
            found: table.header,
        });
    }

    let manifest = ResumeManifest::load(path).filter(|m| m.header == expected_header);
    let (rows, committed_len, resume_index) = match manifest {
        Some(m) => match m.bytes {
            Some(bytes) if bytes <= table.len && table.rows_at(bytes) == Some(m.rows) => {
                (m.rows, bytes, Some(m.last_index))
            }
            _ if m.rows == table.rows => (table.rows, table.committed_len, Some(m.last_index)),
            _ => (table.rows, table.committed_len, None),
        },
        None => (table.rows, table.committed_len, None),
    };

    if rows == 0 && resume_index.is_none() {
        debug!(path = %path.display(), "existing output has no committed rows, recreating");
        return Ok(fresh);
    }
    let truncate_to = (committed_len < table.len).then_some(committed_len);
    if let Some(len) = truncate_to {
        warn!(
            path = %path.display(),
            dropped_bytes = table.len - len,
            "output ends in an uncommitted tail, it will be cut off"
        );
    }

    info!(
        path = %path.display(),
        rows,
        ?resume_index,
        "resuming existing output"
    );

    Ok(OutputPlan {
        mode: OpenMode::Append,
        existing_rows: rows,
        resume_index,
        truncate_to,
        ..fresh
    })
}

/// Header and data rows of an existing table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableShape {
    pub header: Vec<String>,
    /// Complete data rows.
    pub rows: u64,
    /// File length in bytes.
    pub len: u64,
    /// Length up to the end of the last complete row.
    pub committed_len: u64,
    starts: Vec<u64>,
}

impl TableShape {
    /// Complete rows in the first `offset` bytes, if `offset` falls on a row
    /// boundary.
    pub fn rows_at(&self, offset: u64) -> Option<u64> {
        if offset == self.committed_len {
            return Some(self.rows);
        }
        self.starts.binary_search(&offset).ok().map(|i| i as u64)
    }
}

/// Read the header and count data rows. `None` for an empty file.
///
/// A final row that lacks its terminator or stops inside a quoted cell is
/// not counted; `committed_len` then points at its first byte.
pub fn inspect_table(path: &Path) -> Result<Option<TableShape>, StoreError> {
    let bytes = std::fs::read(path)
        .map_err(|e| StoreError::Input(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let header = read_header(&mut reader, path)?;
    if header.is_empty() {
        return Ok(None);
    }

    let mut starts = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| StoreError::Input(format!("{}: {e}", path.display())))?
    {
        if let Some(position) = record.position() {
            starts.push(row_start(&bytes, position.byte()));
        }
    }

    let len = bytes.len() as u64;
    let mut rows = starts.len() as u64;
    let mut committed_len = len;
    if let Some(&last) = starts.last() {
        if !is_complete_row(&bytes[last as usize..]) {
            rows -= 1;
            committed_len = last;
        }
    }
    Ok(Some(TableShape {
        header,
        rows,
        len,
        committed_len,
        starts,
    }))
}

/// The reader reports a row as starting right after the previous `\r`;
/// skip the rest of that terminator.
fn row_start(bytes: &[u8], reported: u64) -> u64 {
    let skipped = bytes
        .get(reported as usize..)
        .map_or(0, |rest| rest.iter().take_while(|&&b| b == b'\r' || b == b'\n').count());
    reported + skipped as u64
}

/// Terminated, with every quote closed.
fn is_complete_row(raw: &[u8]) -> bool {
    let quotes = raw.iter().filter(|&&b| b == b'"').count();
    raw.last() == Some(&b'\n') && quotes % 2 == 0
}

pub(crate) fn table_reader(path: &Path) -> Result<csv::Reader<File>, StoreError> {
    let file = File::open(path)
        .map_err(|e| StoreError::Input(format!("cannot open {}: {e}", path.display())))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

pub(crate) fn read_header<R: Read>(
    reader: &mut csv::Reader<R>,
    path: &Path,
) -> Result<Vec<String>, StoreError> {
    let mut header: Vec<String> = reader
        .headers()
        .map_err(|e| StoreError::Input(format!("{}: {e}", path.display())))?
        .iter()
        .map(String::from)
        .collect();
    if let Some(first) = header.first_mut() {
        if let Some(stripped) = first.strip_prefix(BOM) {
            *first = stripped.to_string();
        }
    }
    if header.len() == 1 && header[0].is_empty() {
        header.clear();
    }
    Ok(header)
}

pub(crate) fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(inner)
}

/// Exclusive writer for an aggregated output.
pub struct OutputSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    header: Vec<String>,
    rows: u64,
    bytes: u64,
    pending: u64,
    track_progress: bool,
}

impl OutputSink {
    pub fn open(plan: &OutputPlan) -> Result<Self, StoreError> {
        if let Some(parent) = plan.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = match plan.mode {
            OpenMode::Create => {
                ResumeManifest::remove(&plan.path)?;
                let mut file = File::create(&plan.path)?;
                file.write_all(BOM.as_bytes())?;
                let mut writer = csv_writer(file);
                writer.write_record(&plan.header)?;
                writer.flush()?;
                writer
            }
            OpenMode::Append => {
                let file = OpenOptions::new().append(true).open(&plan.path)?;
                if let Some(len) = plan.truncate_to {
                    file.set_len(len)?;
                    file.sync_data()?;
                }
                csv_writer(file)
            }
        };
        let bytes = writer.get_ref().metadata()?.len();

        debug!(path = %plan.path.display(), mode = ?plan.mode, "output sink opened");

        Ok(Self {
            writer,
            path: plan.path.clone(),
            header: plan.header.clone(),
            rows: plan.existing_rows,
            bytes,
            pending: 0,
            track_progress: true,
        })
    }

    /// Stop maintaining the resume manifest for this sink.
    pub fn without_manifest(mut self) -> Self {
        self.track_progress = false;
        self
    }

    /// Buffer one output row: the input fields followed by the result cell.
    pub fn write_row(&mut self, fields: &[String], result: &str) -> Result<(), StoreError> {
        let width = self.header.len().saturating_sub(1);
        let mut row: Vec<&str> = fields.iter().take(width).map(String::as_str).collect();
        row.resize(width, "");
        row.push(result);
        self.writer.write_record(&row)?;
        self.pending += 1;
        Ok(())
    }

    /// Make everything written so far durable, then record progress.
    pub fn commit(&mut self, last_index: u64) -> Result<(), StoreError> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.sync_data()?;
        self.bytes = file.metadata()?.len();
        self.rows += self.pending;
        self.pending = 0;
        if self.track_progress {
            ResumeManifest::new(self.header.clone(), self.rows, last_index)
                .with_bytes(self.bytes)
                .save(&self.path)?;
        }
        Ok(())
    }

    /// Data rows durably in the output.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<String> {
        vec!["word".into(), "id".into(), "meaning".into()]
    }

    fn fields(word: &str, id: &str) -> Vec<String> {
        vec![word.into(), id.into()]
    }

    fn resume() -> OutputPolicy {
        OutputPolicy {
            overwrite: false,
            resume: true,
        }
    }

    #[test]
    fn fresh_output_has_bom_header_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.mode, OpenMode::Create);

        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&fields("كتاب", "1"), "名词：书").unwrap();
        sink.commit(1).unwrap();
        assert_eq!(sink.rows(), 1);

        let bytes = std::fs::read(&path).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "\u{feff}word,id,meaning\r\nكتاب,1,名词：书\r\n");
    }

    #[test]
    fn existing_output_without_resume_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "word,id,meaning\r\n").unwrap();
        let err = plan_output(&path, &header(), OutputPolicy::default()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn resume_counts_rows_and_appends_without_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        {
            let plan = plan_output(&path, &header(), resume()).unwrap();
            let mut sink = OutputSink::open(&plan).unwrap().without_manifest();
            sink.write_row(&fields("a", "1"), "x").unwrap();
            sink.write_row(&fields("b", "2"), "y").unwrap();
            sink.commit(2).unwrap();
        }

        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.mode, OpenMode::Append);
        assert_eq!(plan.existing_rows, 2);
        assert_eq!(plan.resume_index, None);
        assert_eq!(plan.resume_point(), 2);

        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&fields("c", "3"), "z").unwrap();
        sink.commit(3).unwrap();
        assert_eq!(sink.rows(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches('\u{feff}').count(), 1);
        assert!(text.ends_with("c,3,z\r\n"));
    }

    #[test]
    fn manifest_refines_resume_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let plan = plan_output(&path, &header(), resume()).unwrap();
        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&fields("a", "1"), "x").unwrap();
        sink.write_row(&fields("c", "3"), "z").unwrap();
        // input record 2 was excluded, so the last consumed index is 4
        sink.commit(4).unwrap();
        drop(sink);

        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.existing_rows, 2);
        assert_eq!(plan.resume_index, Some(4));
        assert_eq!(plan.resume_point(), 4);
    }

    #[test]
    fn stale_manifest_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "word,id,meaning\r\na,1,x\r\nb,2,y\r\n").unwrap();
        ResumeManifest::new(header(), 7, 9).save(&path).unwrap();

        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.resume_index, None);
        assert_eq!(plan.resume_point(), 2);
    }

    #[test]
    fn header_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "word,gloss\r\na,b\r\n").unwrap();
        let err = plan_output(&path, &header(), resume()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
        // nothing was touched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "word,gloss\r\na,b\r\n");
    }

    #[test]
    fn bom_in_existing_header_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "\u{feff}word,id,meaning\r\na,1,x\r\n").unwrap();
        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.existing_rows, 1);
    }

    #[test]
    fn overwrite_truncates_and_drops_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "old,header\r\n1,2\r\n").unwrap();
        ResumeManifest::new(header(), 1, 1).save(&path).unwrap();

        let policy = OutputPolicy {
            overwrite: true,
            resume: false,
        };
        let plan = plan_output(&path, &header(), policy).unwrap();
        assert_eq!(plan.mode, OpenMode::Create);
        let sink = OutputSink::open(&plan).unwrap();
        drop(sink);

        assert!(!ResumeManifest::path_for(&path).exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "\u{feff}word,id,meaning\r\n");
    }

    #[test]
    fn overwrite_with_resume_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = OutputPolicy {
            overwrite: true,
            resume: true,
        };
        let err = plan_output(&dir.path().join("o.csv"), &header(), policy).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn torn_row_inside_quotes_is_cut_before_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let committed = "word,id,meaning\r\na,1,x\r\n";
        std::fs::write(&path, format!("{committed}b,2,\"to")).unwrap();

        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.existing_rows, 1);
        assert_eq!(plan.truncate_to, Some(committed.len() as u64));

        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&fields("b", "2"), "y").unwrap();
        sink.commit(2).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{committed}b,2,y\r\n"));
        assert_eq!(inspect_table(&path).unwrap().unwrap().rows, 2);
    }

    #[test]
    fn unterminated_last_row_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "word,id,meaning\r\na,1,x\r\nb,2,y").unwrap();
        let shape = inspect_table(&path).unwrap().unwrap();
        assert_eq!(shape.rows, 1);
        assert_eq!(shape.committed_len, "word,id,meaning\r\na,1,x\r\n".len() as u64);
        assert_eq!(shape.len, shape.committed_len + 5);
    }

    #[test]
    fn uncommitted_rows_past_the_manifest_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let plan = plan_output(&path, &header(), resume()).unwrap();
        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&fields("a", "1"), "x").unwrap();
        sink.commit(3).unwrap();
        drop(sink);
        let committed = std::fs::read(&path).unwrap();

        // a buffer flush of the next batch landed, its commit never did
        let mut extra = committed.clone();
        extra.extend_from_slice(b"b,4,y\r\nc,5,\"z");
        std::fs::write(&path, &extra).unwrap();

        let plan = plan_output(&path, &header(), resume()).unwrap();
        assert_eq!(plan.existing_rows, 1);
        assert_eq!(plan.resume_index, Some(3));
        assert_eq!(plan.truncate_to, Some(committed.len() as u64));

        drop(OutputSink::open(&plan).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), committed);
    }

    #[test]
    fn row_boundaries_skip_the_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "\u{feff}a,b\r\nx,1\r\ny,2\r\n").unwrap();
        let shape = inspect_table(&path).unwrap().unwrap();
        let first_row = "\u{feff}a,b\r\n".len() as u64;
        assert_eq!(shape.rows_at(first_row), Some(0));
        assert_eq!(shape.rows_at(first_row + 5), Some(1));
        assert_eq!(shape.rows_at(shape.len), Some(2));
        assert_eq!(shape.rows_at(first_row + 1), None);
    }

    #[test]
    fn rows_are_fitted_to_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let plan = plan_output(&path, &header(), resume()).unwrap();
        let mut sink = OutputSink::open(&plan).unwrap();
        sink.write_row(&["only".to_string()], "r").unwrap();
        sink.commit(1).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("only,,r\r\n"));
    }

    #[test]
    fn inspect_table_counts_multiline_cells_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "a,b\r\n\"x\ny\",1\r\nz,2\r\n").unwrap();
        let shape = inspect_table(&path).unwrap().unwrap();
        assert_eq!(shape.rows, 2);
        assert_eq!(shape.header, vec!["a", "b"]);
    }
}
