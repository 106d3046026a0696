//! # rowgen-speech
//!
//! Speech synthesis over HTTP: voice profile parsing and a
//! [`GenerationService`](rowgen_core::GenerationService) that writes one
//! audio artifact per record.

pub mod error;
pub mod service;
pub mod voice;

pub use error::SpeechError;
pub use service::{HttpSpeechService, SpeechConfig};
pub use voice::{parse_voice, resolve_profiles, VoiceProfile, VoiceSource};
