//! Voice profiles: a named speaker or a set of reference recordings.

use std::path::{Path, PathBuf};

use crate::error::SpeechError;

const SPEAKER_PREFIX: &str = "speaker:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceSource {
    /// A speaker built into the synthesis model.
    Speaker(String),
    /// Reference `.wav` files to clone the voice from.
    References(Vec<PathBuf>),
}

/// One synthesis pass: artifacts land in `<out_dir>/<name>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceProfile {
    pub name: String,
    pub source: VoiceSource,
}

impl VoiceProfile {
    pub fn describe(&self) -> String {
        match &self.source {
            VoiceSource::Speaker(s) => format!("speaker={s}"),
            VoiceSource::References(wavs) => format!("{} wavs", wavs.len()),
        }
    }
}

/// Parse `speaker:<name>` or a comma list of `.wav` files and directories.
///
/// Directories contribute their `*.wav` entries in sorted order. Missing
/// paths are an error.
pub fn parse_voice(spec: &str) -> Result<VoiceSource, SpeechError> {
    let spec = spec.trim();
    if let Some(speaker) = spec.strip_prefix(SPEAKER_PREFIX) {
        let speaker = speaker.trim();
        if speaker.is_empty() {
            return Err(SpeechError::InvalidVoice(spec.to_string()));
        }
        return Ok(VoiceSource::Speaker(speaker.to_string()));
    }

    let mut wavs = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let path = expand_home(part);
        if !path.exists() {
            return Err(SpeechError::VoicePathNotFound(path));
        }
        if path.is_dir() {
            let found = wavs_in(&path)?;
            if found.is_empty() {
                return Err(SpeechError::NoReferenceAudio(path));
            }
            wavs.extend(found);
        } else {
            wavs.push(path);
        }
    }
    if wavs.is_empty() {
        return Err(SpeechError::InvalidVoice(spec.to_string()));
    }
    Ok(VoiceSource::References(wavs))
}

/// Pair voice specs with output folder names.
///
/// Without `names` the folders are `voice1..voiceN`; an explicit
/// comma-separated list must have one entry per voice.
pub fn resolve_profiles(
    specs: &[String],
    names: Option<&str>,
) -> Result<Vec<VoiceProfile>, SpeechError> {
    let specs: Vec<&str> = specs
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if specs.is_empty() {
        return Err(SpeechError::NoVoices);
    }

    let names: Vec<String> = match names {
        Some(list) => {
            let names: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
            if names.len() != specs.len() {
                return Err(SpeechError::NameCountMismatch {
                    names: names.len(),
                    voices: specs.len(),
                });
            }
            names
        }
        None => (1..=specs.len()).map(|i| format!("voice{i}")).collect(),
    };

    names
        .into_iter()
        .zip(specs)
        .map(|(name, spec)| {
            Ok(VoiceProfile {
                name,
                source: parse_voice(spec)?,
            })
        })
        .collect()
}

fn wavs_in(dir: &Path) -> Result<Vec<PathBuf>, SpeechError> {
    let pattern = dir.join("*.wav");
    let pattern = pattern.to_string_lossy();
    let mut wavs: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| SpeechError::InvalidVoice(format!("{pattern}: {e}")))?
        .filter_map(Result::ok)
        .collect();
    wavs.sort();
    Ok(wavs)
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_spec() {
        assert_eq!(
            parse_voice(" speaker: Ana Florence ").unwrap(),
            VoiceSource::Speaker("Ana Florence".into())
        );
        assert!(matches!(
            parse_voice("speaker:"),
            Err(SpeechError::InvalidVoice(_))
        ));
    }

    #[test]
    fn files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("refs");
        std::fs::create_dir(&refs).unwrap();
        for name in ["b.wav", "a.wav", "notes.txt"] {
            std::fs::write(refs.join(name), b"RIFF").unwrap();
        }
        let single = dir.path().join("solo.wav");
        std::fs::write(&single, b"RIFF").unwrap();

        let spec = format!("{}, {}", single.display(), refs.display());
        let source = parse_voice(&spec).unwrap();
        assert_eq!(
            source,
            VoiceSource::References(vec![single, refs.join("a.wav"), refs.join("b.wav")])
        );
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = parse_voice("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, SpeechError::VoicePathNotFound(_)));
    }

    #[test]
    fn directory_without_wavs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_voice(&dir.path().display().to_string()).unwrap_err();
        assert!(matches!(err, SpeechError::NoReferenceAudio(_)));
    }

    #[test]
    fn default_names() {
        let specs = vec!["speaker:a".to_string(), "".to_string(), "speaker:b".to_string()];
        let profiles = resolve_profiles(&specs, None).unwrap();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["voice1", "voice2"]);
        assert_eq!(profiles[1].describe(), "speaker=b");
    }

    #[test]
    fn explicit_names_must_match() {
        let specs = vec!["speaker:a".to_string(), "speaker:b".to_string()];
        let profiles = resolve_profiles(&specs, Some("male, female")).unwrap();
        assert_eq!(profiles[0].name, "male");
        assert_eq!(profiles[1].name, "female");

        let err = resolve_profiles(&specs, Some("only")).unwrap_err();
        assert!(matches!(
            err,
            SpeechError::NameCountMismatch {
                names: 1,
                voices: 2
            }
        ));
    }

    #[test]
    fn no_voices() {
        assert!(matches!(
            resolve_profiles(&[" ".to_string()], None),
            Err(SpeechError::NoVoices)
        ));
    }
}
