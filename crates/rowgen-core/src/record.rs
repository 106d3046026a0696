use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("static regex"));

/// One data row of the input table.
///
/// `fields` is aligned with the header of the source that produced the
/// record; rows shorter than the header are padded with empty cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// 1-based position of the row in the input, header excluded.
    pub index: u64,
    pub fields: Vec<String>,
    /// Primary column, or the fallback column when the primary is empty.
    pub resolved_text: String,
    /// Filesystem-safe name for artifacts produced from this row.
    pub identifier: Option<String>,
}

impl Record {
    /// Base name for artifacts: the identifier, or `row_<index>`.
    pub fn artifact_stem(&self) -> String {
        match &self.identifier {
            Some(id) => id.clone(),
            None => format!("row_{}", self.index),
        }
    }

    /// Identifier as written to the failure log (empty when absent).
    pub fn row_id(&self) -> &str {
        self.identifier.as_deref().unwrap_or("")
    }
}

/// Strip characters that cannot appear in a file name.
///
/// Returns `None` when nothing usable remains.
pub fn safe_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(trimmed, "_").into_owned();
    Some(cleaned)
}

/// A successful, normalized service result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Generated text (already normalized to its canonical form).
    Text(String),
    /// A file written by the service.
    Artifact(PathBuf),
}

impl Payload {
    /// Value written to the result column of the tabular output.
    pub fn cell(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Artifact(path) => path.display().to_string(),
        }
    }
}

/// Exactly one outcome exists per record that reaches the invoker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Success(Payload),
    Failure(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Column selector: a header name, or a zero-based position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl ColumnRef {
    /// Resolve against a header, returning the column position.
    pub fn position(&self, header: &[String]) -> Option<usize> {
        match self {
            Self::Index(i) => (*i < header.len()).then_some(*i),
            Self::Name(name) => header.iter().position(|h| h == name),
        }
    }
}

impl FromStr for ColumnRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = s.parse() {
                return Ok(Self::Index(i));
            }
        }
        Ok(Self::Name(s.to_string()))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}
