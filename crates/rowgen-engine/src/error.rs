use rowgen_core::ServiceError;
use rowgen_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

impl PipelineError {
    /// Raised before any output was touched.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Store(e) => e.is_config(),
            Self::Service(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_classification() {
        assert!(PipelineError::Config("end < start".into()).is_config());
        assert!(PipelineError::from(StoreError::MissingColumn("word".into())).is_config());
        assert!(!PipelineError::from(StoreError::Persistence("disk full".into())).is_config());
        assert!(!PipelineError::from(ServiceError::AuthenticationFailed("401".into())).is_config());
    }
}
