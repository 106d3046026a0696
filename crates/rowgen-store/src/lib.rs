//! # rowgen-store
//!
//! Everything that touches the file system on behalf of a run: the CSV
//! row source, the aggregated output sink with its resume manifest, the
//! atomic rewrite helpers and the failure log.

pub mod error;
pub mod failure_log;
pub mod manifest;
pub mod output;
pub mod rewrite;
pub mod source;

pub use error::StoreError;
pub use failure_log::{FailureLog, FAILURE_LOG_HEADER};
pub use manifest::ResumeManifest;
pub use output::{inspect_table, plan_output, OpenMode, OutputPlan, OutputPolicy, OutputSink, TableShape};
pub use rewrite::{backup_file, backup_path, AtomicCsvWriter, OutputTable};
pub use source::{RowSource, SourceSpec};
