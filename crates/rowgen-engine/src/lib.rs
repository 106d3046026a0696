//! # rowgen-engine
//!
//! The resumable batch pipeline: windowing, batching, the retrying and
//! degrading service invoker, the run orchestrator and rewrite-first-N.

pub mod batch;
pub mod error;
pub mod invoker;
pub mod pipeline;
pub mod rewrite;
pub mod window;

pub use batch::BatchAccumulator;
pub use error::PipelineError;
pub use invoker::{failure_reason, Invocation, ServiceInvoker};
pub use pipeline::{OutputTarget, Pipeline, PipelineConfig, RunPlan, RunSummary};
pub use rewrite::{RewriteRequest, RewriteSummary};
pub use window::{skip_target, Admission, SkipReason, WindowFilter, WindowOptions};
