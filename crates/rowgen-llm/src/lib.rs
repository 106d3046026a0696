//! # rowgen-llm
//!
//! Text enrichment through a chat-completions API, plus a scripted
//! [`MockService`] for driving pipelines in tests.

pub mod chat;
pub mod mock;
pub mod prompt;

pub use chat::{ChatConfig, ChatEnrichmentService};
pub use mock::{MockCall, MockResponse, MockService};
pub use prompt::{extract_json_array, system_prompt, user_prompt};
