//! Windowing Filter: decides which records enter the pipeline.

use rowgen_core::{ArtifactLayout, Record};

use crate::error::PipelineError;

/// Row range, count limit and existing-artifact check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowOptions {
    /// 1-based, inclusive.
    pub start_index: u64,
    /// Inclusive; 0 means unbounded.
    pub end_index: u64,
    /// Maximum admitted records; 0 means unbounded.
    pub limit: u64,
    pub skip_if_output_exists: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            start_index: 1,
            end_index: 0,
            limit: 0,
            skip_if_output_exists: false,
        }
    }
}

impl WindowOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.start_index < 1 {
            return Err(PipelineError::Config("start index must be >= 1".into()));
        }
        if self.end_index != 0 && self.end_index < self.start_index {
            return Err(PipelineError::Config(format!(
                "end index {} is before start index {}",
                self.end_index, self.start_index
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    BeforeStart,
    EmptyText,
    ArtifactExists,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Skip(SkipReason),
    /// Nothing after this record can be admitted.
    Stop,
}

/// Number of leading input records a run passes over: the requested start
/// or what the output already holds, whichever is further.
pub fn skip_target(start_index: u64, resume_point: u64) -> u64 {
    start_index.saturating_sub(1).max(resume_point)
}

pub struct WindowFilter {
    options: WindowOptions,
    admitted: u64,
}

impl WindowFilter {
    pub fn new(options: WindowOptions) -> Result<Self, PipelineError> {
        options.validate()?;
        Ok(Self {
            options,
            admitted: 0,
        })
    }

    /// Count records admitted by earlier runs against the limit.
    pub fn with_admitted(mut self, admitted: u64) -> Self {
        self.admitted = admitted;
        self
    }

    pub fn options(&self) -> &WindowOptions {
        &self.options
    }

    /// Classify `record` without changing state. Call [`admit`](Self::admit)
    /// once the record is actually taken.
    pub fn check(&self, record: &Record, layout: Option<&ArtifactLayout>) -> Admission {
        let o = &self.options;
        if o.end_index != 0 && record.index > o.end_index {
            return Admission::Stop;
        }
        if self.limit_reached() {
            return Admission::Stop;
        }
        if record.index < o.start_index {
            return Admission::Skip(SkipReason::BeforeStart);
        }
        if record.resolved_text.is_empty() {
            return Admission::Skip(SkipReason::EmptyText);
        }
        if o.skip_if_output_exists && layout.is_some_and(|l| l.exists_for(record)) {
            return Admission::Skip(SkipReason::ArtifactExists);
        }
        Admission::Admit
    }

    pub fn admit(&mut self) {
        self.admitted += 1;
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    pub fn limit_reached(&self) -> bool {
        self.options.limit != 0 && self.admitted >= self.options.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u64, text: &str) -> Record {
        Record {
            index,
            fields: vec![text.into()],
            resolved_text: text.into(),
            identifier: Some(format!("w{index}")),
        }
    }

    fn filter(start: u64, end: u64, limit: u64) -> WindowFilter {
        WindowFilter::new(WindowOptions {
            start_index: start,
            end_index: end,
            limit,
            skip_if_output_exists: false,
        })
        .unwrap()
    }

    #[test]
    fn range_is_inclusive() {
        let f = filter(3, 5, 0);
        assert_eq!(f.check(&record(2, "a"), None), Admission::Skip(SkipReason::BeforeStart));
        assert_eq!(f.check(&record(3, "a"), None), Admission::Admit);
        assert_eq!(f.check(&record(5, "a"), None), Admission::Admit);
        assert_eq!(f.check(&record(6, "a"), None), Admission::Stop);
    }

    #[test]
    fn zero_end_is_unbounded() {
        let f = filter(1, 0, 0);
        assert_eq!(f.check(&record(1_000_000, "a"), None), Admission::Admit);
    }

    #[test]
    fn empty_text_is_skipped() {
        let f = filter(1, 0, 0);
        assert_eq!(f.check(&record(1, ""), None), Admission::Skip(SkipReason::EmptyText));
    }

    #[test]
    fn limit_counts_admissions() {
        let mut f = filter(1, 0, 2);
        assert_eq!(f.check(&record(1, "a"), None), Admission::Admit);
        f.admit();
        // a check alone does not consume the budget
        assert_eq!(f.check(&record(2, "b"), None), Admission::Admit);
        f.admit();
        assert!(f.limit_reached());
        assert_eq!(f.check(&record(3, "c"), None), Admission::Stop);
    }

    #[test]
    fn resumed_admissions_count_toward_limit() {
        let f = filter(1, 0, 10).with_admitted(10);
        assert_eq!(f.check(&record(11, "a"), None), Admission::Stop);
    }

    #[test]
    fn existing_artifacts_are_skipped_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path(), "wav");
        std::fs::write(dir.path().join("w1.wav"), b"RIFF").unwrap();

        let mut opts = WindowOptions::default();
        assert_eq!(
            WindowFilter::new(opts.clone())
                .unwrap()
                .check(&record(1, "a"), Some(&layout)),
            Admission::Admit
        );
        opts.skip_if_output_exists = true;
        let f = WindowFilter::new(opts).unwrap();
        assert_eq!(
            f.check(&record(1, "a"), Some(&layout)),
            Admission::Skip(SkipReason::ArtifactExists)
        );
        assert_eq!(f.check(&record(2, "b"), Some(&layout)), Admission::Admit);
        assert_eq!(f.check(&record(1, "a"), None), Admission::Admit);
    }

    #[test]
    fn invalid_windows_are_config_errors() {
        let bad_end = WindowOptions {
            start_index: 10,
            end_index: 5,
            ..WindowOptions::default()
        };
        assert!(WindowFilter::new(bad_end).err().is_some_and(|e| e.is_config()));

        let bad_start = WindowOptions {
            start_index: 0,
            ..WindowOptions::default()
        };
        assert!(bad_start.validate().is_err());
    }

    #[test]
    fn skip_target_takes_the_further_point() {
        assert_eq!(skip_target(1, 0), 0);
        assert_eq!(skip_target(11, 0), 10);
        assert_eq!(skip_target(1, 10), 10);
        assert_eq!(skip_target(5, 10), 10);
        assert_eq!(skip_target(21, 10), 20);
    }
}
