use std::time::Duration;

/// How the pipeline reacts to a service failure.
///
/// Every [`ServiceError`] maps to exactly one class, so the retry and
/// degrade decisions in the invoker are an exhaustive match rather than a
/// catch-all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Abort the whole run. Retrying or degrading cannot help.
    Fatal,
    /// Retry the batch with backoff; degrade to per-record calls once the
    /// attempt budget is spent.
    Transient,
    /// The batch contains something the service refuses. Degrade right away
    /// so the offending record can be isolated.
    PerRecordIsolated,
}

/// Typed error hierarchy for generation service calls.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ServiceError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("failed to write artifact {path}: {reason}")]
    ArtifactWrite { path: String, reason: String },

    // Transient
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("output length mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("API error: {0}")]
    ApiError(String),

    // Per-record
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("item rejected: {0}")]
    ItemRejected(String),
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed(_) | Self::ArtifactWrite { .. } => ErrorClass::Fatal,
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::NetworkError(_)
            | Self::Timeout(_)
            | Self::MalformedResponse(_)
            | Self::CountMismatch { .. }
            | Self::ApiError(_) => ErrorClass::Transient,
            Self::InvalidRequest(_) | Self::ItemRejected(_) => ErrorClass::PerRecordIsolated,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Short classification string for logging and failure reasons.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ArtifactWrite { .. } => "artifact_write",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::MalformedResponse(_) => "malformed_response",
            Self::CountMismatch { .. } => "count_mismatch",
            Self::ApiError(_) => "api_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ItemRejected(_) => "item_rejected",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            408 => Self::Timeout(Duration::ZERO),
            429 => Self::RateLimited { retry_after: None },
            400..=499 => Self::InvalidRequest(format!("status {status}: {body}")),
            500..=599 => Self::ServerError { status, body },
            _ => Self::MalformedResponse(format!("unexpected status {status}: {body}")),
        }
    }
}
