use std::path::PathBuf;

/// Voice configuration problems. All of them abort before any output is written.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("at least one voice is required")]
    NoVoices,

    #[error("invalid voice spec: {0}")]
    InvalidVoice(String),

    #[error("voice path not found: {}", .0.display())]
    VoicePathNotFound(PathBuf),

    #[error("no .wav files in {}", .0.display())]
    NoReferenceAudio(PathBuf),

    #[error("voice names count ({names}) must match the number of voices ({voices})")]
    NameCountMismatch { names: usize, voices: usize },

    #[error("http client: {0}")]
    Client(String),
}
