#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("input is missing required column {0}")]
    MissingColumn(String),

    #[error("output header mismatch in {path}: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        path: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid input: {0}")]
    Input(String),

    #[error("{0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    /// Configuration and input problems abort before any output is touched;
    /// everything else is a write failure.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}

impl From<csv::Error> for StoreError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            StoreError::Persistence(e.to_string())
        } else {
            StoreError::Input(e.to_string())
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Persistence(format!("serialization: {e}"))
    }
}
