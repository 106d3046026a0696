//! Rewrite-first-N: recompute the result cell of the leading rows of an
//! existing output and replace it atomically, keeping a backup.

use std::path::PathBuf;

use tracing::{info, instrument, warn};

use rowgen_core::{ItemOutcome, Record};
use rowgen_store::{backup_file, AtomicCsvWriter, FailureLog, OutputTable, RowSource, SourceSpec};

use crate::error::PipelineError;
use crate::pipeline::{Pacer, Pipeline, RunSummary};

#[derive(Clone, Debug)]
pub struct RewriteRequest {
    pub input: PathBuf,
    pub source: SourceSpec,
    pub output: PathBuf,
    pub result_column: String,
    /// Leading records to recompute. Must be at least 1.
    pub count: u64,
    pub failure_log: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RewriteSummary {
    pub summary: RunSummary,
    pub backup: PathBuf,
}

impl Pipeline {
    /// Recompute the first `count` records and splice the new cells into the
    /// output. Each record is paired with the output row that carries its
    /// input fields; records with no row were excluded by the run that wrote
    /// the output and are skipped. Records that are empty or fail keep their
    /// previous cell.
    #[instrument(skip_all, fields(output = %request.output.display(), count = request.count))]
    pub async fn rewrite_first(&self, request: &RewriteRequest) -> Result<RewriteSummary, PipelineError> {
        let count = request.count;
        if count < 1 {
            return Err(PipelineError::Config("rewrite count must be >= 1".into()));
        }
        if !request.output.exists() {
            return Err(PipelineError::Config(format!(
                "rewrite needs an existing output, {} not found",
                request.output.display()
            )));
        }

        let table = OutputTable::load(&request.output)?;
        let column = table.column(&request.result_column).ok_or_else(|| {
            PipelineError::Config(format!(
                "output {} has no {} column",
                request.output.display(),
                request.result_column
            ))
        })?;
        if (table.rows.len() as u64) < count {
            return Err(PipelineError::Config(format!(
                "output has {} rows, fewer than the {count} to rewrite",
                table.rows.len()
            )));
        }

        let mut source = RowSource::open(&request.input, &request.source)?;
        let records = source.take_records(count as usize)?;
        if (records.len() as u64) < count {
            return Err(PipelineError::Config(format!(
                "input has {} rows, fewer than the {count} to rewrite",
                records.len()
            )));
        }

        let (rows, paired): (Vec<usize>, Vec<Record>) = pair_rows(&table.rows, column, records.iter())
            .into_iter()
            .zip(&records)
            .filter_map(|(row, record)| row.map(|row| (row, record.clone())))
            .unzip();
        if paired.is_empty() {
            return Err(PipelineError::Config(format!(
                "none of the first {count} input records has a row in {}",
                request.output.display()
            )));
        }
        let unpaired = records.len() - paired.len();
        if unpaired > 0 {
            warn!(unpaired, "records without an output row are skipped");
        }

        let (cells, mut summary) = self.recompute(&paired, &request.failure_log).await?;
        summary.skipped += unpaired as u64;

        let mut replacements: Vec<Option<String>> = vec![None; table.rows.len()];
        for (row, cell) in rows.into_iter().zip(cells) {
            replacements[row] = cell;
        }

        let backup = backup_file(&request.output)?;
        let mut writer = AtomicCsvWriter::new(&request.output)?;
        writer.write_row(&table.header)?;
        for (row, replacement) in table.rows.iter().zip(&replacements) {
            match replacement {
                Some(cell) => {
                    let mut row = row.clone();
                    row[column] = cell.clone();
                    writer.write_row(&row)?;
                }
                None => writer.write_row(row)?,
            }
        }
        writer.finish()?;

        info!(
            rewritten = summary.written,
            failed = summary.failed,
            backup = %backup.display(),
            "rewrite finished"
        );
        Ok(RewriteSummary { summary, backup })
    }

    /// New cell per record, `None` where the old one stays.
    async fn recompute(
        &self,
        records: &[Record],
        failure_log: &std::path::Path,
    ) -> Result<(Vec<Option<String>>, RunSummary), PipelineError> {
        let mut cells: Vec<Option<String>> = vec![None; records.len()];
        let mut summary = RunSummary::default();
        let mut failures = FailureLog::new(failure_log);
        let mut pacer = Pacer::new(self.config().pacing);

        let mut pending: Vec<usize> = Vec::new();
        for (pos, record) in records.iter().enumerate() {
            if record.resolved_text.is_empty() {
                summary.skipped += 1;
                continue;
            }
            if let Err(reason) = self.service().precheck(record) {
                warn!(row = record.index, %reason, "record rejected before dispatch");
                failures.record(record, &reason)?;
                summary.failed += 1;
                continue;
            }
            pending.push(pos);
        }
        summary.admitted = pending.len() as u64;

        for chunk in pending.chunks(self.config().batch_size.max(1)) {
            let batch: Vec<Record> = chunk.iter().map(|&pos| records[pos].clone()).collect();
            let invocation = self.dispatch(&batch, &mut pacer, &mut summary).await?;
            for (&pos, outcome) in chunk.iter().zip(invocation.outcomes) {
                match outcome {
                    ItemOutcome::Success(payload) => {
                        cells[pos] = Some(payload.cell());
                        summary.written += 1;
                    }
                    ItemOutcome::Failure(reason) => {
                        failures.record(&records[pos], &reason)?;
                        summary.failed += 1;
                    }
                }
            }
        }

        self.metrics().record_written(summary.written);
        self.metrics().record_failed(summary.failed);
        self.metrics().record_skipped(summary.skipped);
        Ok((cells, summary))
    }
}

/// Output row index per record. Rows keep input order, so each match is
/// searched after the previous one; `width` leading cells hold the input
/// fields.
fn pair_rows<'a>(
    rows: &[Vec<String>],
    width: usize,
    records: impl Iterator<Item = &'a Record>,
) -> Vec<Option<usize>> {
    let mut next = 0;
    records
        .map(|record| {
            let found = rows[next..]
                .iter()
                .position(|row| carries_fields(row, width, &record.fields))
                .map(|offset| next + offset);
            if let Some(row) = found {
                next = row + 1;
            }
            found
        })
        .collect()
}

/// Whether the first `width` cells of `row` are `fields` as the sink wrote
/// them: truncated or padded to `width`.
fn carries_fields(row: &[String], width: usize, fields: &[String]) -> bool {
    (0..width).all(|i| {
        let cell = row.get(i).map_or("", String::as_str);
        let field = fields.get(i).map_or("", String::as_str);
        cell == field
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use rowgen_llm::MockService;
    use rowgen_telemetry::RunMetrics;
    use std::path::Path;
    use std::sync::Arc;

    fn setup(dir: &Path, input_rows: usize, output_rows: usize) -> (PathBuf, PathBuf) {
        let input = dir.join("words.csv");
        let mut body = String::from("word\n");
        for i in 1..=input_rows {
            body.push_str(&format!("w{i}\n"));
        }
        std::fs::write(&input, body).unwrap();

        let output = dir.join("out.csv");
        let mut body = String::from("\u{feff}word,meaning_pos\r\n");
        for i in 1..=output_rows {
            body.push_str(&format!("w{i},old{i}\r\n"));
        }
        std::fs::write(&output, body).unwrap();
        (input, output)
    }

    fn request(input: PathBuf, output: PathBuf, count: u64) -> RewriteRequest {
        RewriteRequest {
            failure_log: FailureLog::default_path_for(&output),
            input,
            source: SourceSpec::primary("word"),
            output,
            result_column: "meaning_pos".into(),
            count,
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(MockService::echo()),
            PipelineConfig::default(),
            Arc::new(RunMetrics::new()),
        )
    }

    #[tokio::test]
    async fn invalid_requests_leave_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = setup(dir.path(), 3, 5);
        let before = std::fs::read(&output).unwrap();
        let p = pipeline();

        for count in [0, 4] {
            let err = p.rewrite_first(&request(input.clone(), output.clone(), count)).await.unwrap_err();
            assert!(err.is_config(), "count {count}: {err}");
        }
        let err = p.rewrite_first(&request(input.clone(), output.clone(), 6)).await.unwrap_err();
        assert!(err.is_config());

        let mut missing_column = request(input, output.clone(), 2);
        missing_column.result_column = "audio".into();
        assert!(p.rewrite_first(&missing_column).await.unwrap_err().is_config());

        assert_eq!(std::fs::read(&output).unwrap(), before);
        assert!(!rowgen_store::backup_path(&output).exists());
    }

    #[tokio::test]
    async fn output_from_another_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = setup(dir.path(), 3, 3);
        std::fs::write(&output, "word,meaning_pos\r\nx1,a\r\nx2,b\r\nx3,c\r\n").unwrap();
        let before = std::fs::read(&output).unwrap();

        let err = pipeline().rewrite_first(&request(input, output.clone(), 2)).await.unwrap_err();
        assert!(err.is_config());
        assert_eq!(std::fs::read(&output).unwrap(), before);
        assert!(!rowgen_store::backup_path(&output).exists());
    }

    #[test]
    fn pairing_follows_row_order() {
        let rows: Vec<Vec<String>> = [["a", "1"], ["c", "3"], ["a", "5"]]
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        let record = |index: u64, word: &str| Record {
            index,
            fields: vec![word.into()],
            resolved_text: word.into(),
            identifier: None,
        };
        let records = [record(1, "a"), record(2, "b"), record(3, "c"), record(4, "a")];
        assert_eq!(
            pair_rows(&rows, 1, records.iter()),
            vec![Some(0), None, Some(1), Some(2)]
        );
    }

    #[tokio::test]
    async fn missing_output_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = setup(dir.path(), 3, 3);
        std::fs::remove_file(&output).unwrap();
        let err = pipeline().rewrite_first(&request(input, output, 1)).await.unwrap_err();
        assert!(err.is_config());
    }
}
