//! Row Source: lazy, ordered records from a CSV input.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, warn};

use rowgen_core::{safe_identifier, ColumnRef, Record};

use crate::error::StoreError;

const BOM: char = '\u{feff}';

/// Which columns feed a record's text and identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    pub primary: ColumnRef,
    pub fallback: Option<ColumnRef>,
    pub identifier: Option<ColumnRef>,
}

impl SourceSpec {
    /// Parse a column reference as given on the command line.
    pub fn primary(column: &str) -> Self {
        Self::new(column.parse().unwrap_or_else(|never| match never {}))
    }

    pub fn new(primary: ColumnRef) -> Self {
        Self {
            primary,
            fallback: None,
            identifier: None,
        }
    }

    pub fn with_fallback(mut self, column: Option<ColumnRef>) -> Self {
        self.fallback = column;
        self
    }

    pub fn with_identifier(mut self, column: Option<ColumnRef>) -> Self {
        self.identifier = column;
        self
    }
}

/// Streams [`Record`]s in file order. Not restartable: skipping and
/// iterating consume the underlying reader.
pub struct RowSource {
    reader: csv::Reader<File>,
    path: PathBuf,
    header: Vec<String>,
    primary: usize,
    fallback: Option<usize>,
    identifier: Option<usize>,
    next_index: u64,
    buf: StringRecord,
}

impl RowSource {
    pub fn open(path: &Path, spec: &SourceSpec) -> Result<Self, StoreError> {
        let file = File::open(path)
            .map_err(|e| StoreError::Input(format!("cannot open {}: {e}", path.display())))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let mut header: Vec<String> = reader
            .headers()
            .map_err(|e| StoreError::Input(format!("{}: {e}", path.display())))?
            .iter()
            .map(String::from)
            .collect();
        if let Some(first) = header.first_mut() {
            if first.starts_with(BOM) {
                *first = first.trim_start_matches(BOM).to_string();
            }
        }
        if header.is_empty() || header.iter().all(String::is_empty) {
            return Err(StoreError::Input(format!("{} has no header", path.display())));
        }

        let primary = spec
            .primary
            .position(&header)
            .ok_or_else(|| StoreError::MissingColumn(spec.primary.to_string()))?;
        let fallback = optional_column(spec.fallback.as_ref(), &header, "fallback");
        let identifier = optional_column(spec.identifier.as_ref(), &header, "identifier");

        debug!(
            path = %path.display(),
            columns = header.len(),
            primary,
            ?fallback,
            ?identifier,
            "opened row source"
        );

        Ok(Self {
            reader,
            path: path.to_owned(),
            header,
            primary,
            fallback,
            identifier,
            next_index: 1,
            buf: StringRecord::new(),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index the next record will carry.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Discard `n` records. Returns how many were actually available.
    pub fn skip(&mut self, n: u64) -> Result<u64, StoreError> {
        let mut skipped = 0;
        while skipped < n {
            if !self.reader.read_record(&mut self.buf)? {
                break;
            }
            self.next_index += 1;
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Discard exactly `n` records, failing when the input is shorter.
    pub fn skip_exact(&mut self, n: u64) -> Result<(), StoreError> {
        let skipped = self.skip(n)?;
        if skipped < n {
            return Err(StoreError::Config(format!(
                "skip target {n} exceeds input rows ({skipped} available in {})",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Read up to `n` records.
    pub fn take_records(&mut self, n: usize) -> Result<Vec<Record>, StoreError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.next() {
                Some(record) => out.push(record?),
                None => break,
            }
        }
        Ok(out)
    }

    fn build_record(&self, index: u64) -> Record {
        let mut fields: Vec<String> = self.buf.iter().map(String::from).collect();
        if fields.len() < self.header.len() {
            fields.resize(self.header.len(), String::new());
        }

        let cell = |pos: usize| fields.get(pos).map(|s| s.trim()).unwrap_or("");
        let mut text = cell(self.primary);
        if text.is_empty() {
            if let Some(fb) = self.fallback {
                text = cell(fb);
            }
        }
        let resolved_text = text.to_string();
        let identifier = self.identifier.and_then(|pos| safe_identifier(cell(pos)));

        Record {
            index,
            fields,
            resolved_text,
            identifier,
        }
    }
}

impl Iterator for RowSource {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.buf) {
            Ok(true) => {
                let index = self.next_index;
                self.next_index += 1;
                Some(Ok(self.build_record(index)))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn optional_column(column: Option<&ColumnRef>, header: &[String], role: &str) -> Option<usize> {
    let column = column?;
    let pos = column.position(header);
    if pos.is_none() {
        warn!(column = %column, role, "column not present in input header, ignoring");
    }
    pos
}
