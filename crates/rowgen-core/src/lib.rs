//! # rowgen-core
//!
//! Shared vocabulary for the rowgen pipeline: records and their outcomes,
//! the generation service seam, the service error taxonomy, retry math and
//! normalization of service items.

pub mod errors;
pub mod normalize;
pub mod record;
pub mod retry;
pub mod security;
pub mod service;

pub use errors::{ErrorClass, ServiceError};
pub use normalize::{normalize_item, MeaningItem};
pub use record::{safe_identifier, ColumnRef, ItemOutcome, Payload, Record};
pub use retry::RetryPolicy;
pub use security::ApiKey;
pub use service::{ArtifactLayout, GenerationService};
